use crate::schema::*;
use chrono::NaiveDateTime;
use diesel::dsl::max;
use diesel::prelude::*;
use patchgate_common::errors::*;
use patchgate_common::PatchInfo;

#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = patch)]
pub struct Patch {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub date: NaiveDateTime,
    pub source_id: i32,
}

impl Patch {
    pub fn get_id(my_id: i64, connection: &mut SqliteConnection) -> Result<Option<Patch>> {
        use crate::schema::patch::dsl::*;
        let item = patch
            .filter(id.eq(my_id))
            .select(Patch::as_select())
            .first(connection)
            .optional()?;
        Ok(item)
    }

    /// Date of the most recent patch seen for this source
    pub fn last_date(my_source_id: i32, connection: &mut SqliteConnection) -> Result<Option<NaiveDateTime>> {
        use crate::schema::patch::dsl::*;
        let last = patch
            .filter(source_id.eq(my_source_id))
            .select(max(date))
            .first::<Option<NaiveDateTime>>(connection)?;
        Ok(last)
    }

    pub fn count(connection: &mut SqliteConnection) -> Result<i64> {
        use crate::schema::patch::dsl::*;
        let count = patch.count().get_result(connection)?;
        Ok(count)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = patch)]
pub struct NewPatch<'a> {
    pub id: i64,
    pub name: &'a str,
    pub url: &'a str,
    pub date: NaiveDateTime,
    pub source_id: i32,
}

impl<'a> NewPatch<'a> {
    pub fn new(info: &'a PatchInfo, source_id: i32) -> NewPatch<'a> {
        NewPatch {
            id: info.id,
            name: &info.name,
            url: &info.url,
            date: info.date,
            source_id,
        }
    }

    /// Insert the patch, replacing the previous metadata if it's already known
    pub fn upsert(&self, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::patch::*;

        diesel::insert_into(table)
            .values(self)
            .on_conflict(id)
            .do_update()
            .set((
                name.eq(diesel::upsert::excluded(name)),
                url.eq(diesel::upsert::excluded(url)),
                date.eq(diesel::upsert::excluded(date)),
                source_id.eq(diesel::upsert::excluded(source_id)),
            ))
            .execute(connection)?;

        Ok(())
    }
}
