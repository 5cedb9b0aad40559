use crate::models::{Repo, TestRun};
use crate::schema::*;
use diesel::prelude::*;
use patchgate_common::errors::*;
use patchgate_common::TestResult;

#[derive(Identifiable, Queryable, Selectable, Associations, Clone, PartialEq, Eq, Debug)]
#[diesel(belongs_to(Repo))]
#[diesel(belongs_to(TestRun, foreign_key = testrun_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = baseline)]
pub struct Baseline {
    pub id: i32,
    pub repo_id: i32,
    pub commit_id: String,
    pub commit_date: i64,
    pub testrun_id: i32,
}

impl Baseline {
    /// The baseline of `commit` together with the test run it currently points at
    pub fn get_with_run(
        my_repo_id: i32,
        commit: &str,
        connection: &mut SqliteConnection,
    ) -> Result<Option<(Baseline, TestRun)>> {
        let item = baseline::table
            .inner_join(test_run::table)
            .filter(baseline::repo_id.eq(my_repo_id))
            .filter(baseline::commit_id.eq(commit))
            .select((Baseline::as_select(), TestRun::as_select()))
            .first(connection)
            .optional()?;
        Ok(item)
    }

    /// Most recent commit whose linked test run passed
    pub fn stable(my_repo_id: i32, connection: &mut SqliteConnection) -> Result<Option<Baseline>> {
        let item = baseline::table
            .inner_join(test_run::table)
            .filter(baseline::repo_id.eq(my_repo_id))
            .filter(test_run::result_id.eq(TestResult::Success.ordinal()))
            .order_by((baseline::commit_date.desc(), baseline::id.desc()))
            .select(Baseline::as_select())
            .first(connection)
            .optional()?;
        Ok(item)
    }

    /// Most recent commit, regardless of its result
    pub fn latest(my_repo_id: i32, connection: &mut SqliteConnection) -> Result<Option<(Baseline, TestRun)>> {
        let item = baseline::table
            .inner_join(test_run::table)
            .filter(baseline::repo_id.eq(my_repo_id))
            .order_by((baseline::commit_date.desc(), baseline::id.desc()))
            .select((Baseline::as_select(), TestRun::as_select()))
            .first(connection)
            .optional()?;
        Ok(item)
    }

    pub fn set_testrun(&self, run_id: i32, connection: &mut SqliteConnection) -> Result<()> {
        diesel::update(baseline::table.filter(baseline::id.eq(self.id)))
            .set(baseline::testrun_id.eq(run_id))
            .execute(connection)?;
        Ok(())
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = baseline)]
pub struct NewBaseline<'a> {
    pub repo_id: i32,
    pub commit_id: &'a str,
    pub commit_date: i64,
    pub testrun_id: i32,
}

impl NewBaseline<'_> {
    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<()> {
        diesel::insert_into(baseline::table)
            .values(self)
            .execute(connection)?;
        Ok(())
    }
}
