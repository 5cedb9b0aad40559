use crate::schema::*;
use diesel::prelude::*;
use patchgate_common::errors::*;

/// A patchwork project on a specific instance
#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = patch_source)]
pub struct Source {
    pub id: i32,
    pub baseurl: String,
    pub project_id: i64,
}

impl Source {
    pub fn list(connection: &mut SqliteConnection) -> Result<Vec<Source>> {
        use crate::schema::patch_source::dsl::*;
        let items = patch_source
            .order_by(id)
            .select(Source::as_select())
            .load(connection)?;
        Ok(items)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = patch_source)]
pub struct NewSource<'a> {
    pub baseurl: &'a str,
    pub project_id: i64,
}

impl NewSource<'_> {
    pub fn upsert(&self, connection: &mut SqliteConnection) -> Result<Source> {
        use crate::schema::patch_source::*;

        let result = diesel::insert_into(table)
            .values(self)
            .on_conflict((baseurl, project_id))
            .do_update()
            .set(baseurl.eq(diesel::upsert::excluded(baseurl)))
            .returning(Source::as_select())
            .get_result::<Source>(connection)?;

        Ok(result)
    }
}
