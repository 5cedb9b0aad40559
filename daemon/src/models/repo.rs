use crate::schema::*;
use diesel::prelude::*;
use patchgate_common::errors::*;

#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = repo)]
pub struct Repo {
    pub id: i32,
    pub url: String,
}

impl Repo {
    pub fn get_by_url(my_url: &str, connection: &mut SqliteConnection) -> Result<Option<Repo>> {
        use crate::schema::repo::dsl::*;
        let item = repo
            .filter(url.eq(my_url))
            .select(Repo::as_select())
            .first(connection)
            .optional()?;
        Ok(item)
    }

    pub fn list(connection: &mut SqliteConnection) -> Result<Vec<Repo>> {
        use crate::schema::repo::dsl::*;
        let items = repo
            .order_by(id)
            .select(Repo::as_select())
            .load(connection)?;
        Ok(items)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = repo)]
pub struct NewRepo<'a> {
    pub url: &'a str,
}

impl NewRepo<'_> {
    pub fn upsert(&self, connection: &mut SqliteConnection) -> Result<Repo> {
        use crate::schema::repo::*;

        let result = diesel::insert_into(table)
            .values(self)
            .on_conflict(url)
            .do_update()
            .set(url.eq(diesel::upsert::excluded(url)))
            .returning(Repo::as_select())
            .get_result::<Repo>(connection)?;

        Ok(result)
    }
}
