use crate::schema::*;
use diesel::prelude::*;
use patchgate_common::errors::*;
use patchgate_common::TestResult;

#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = test_run)]
pub struct TestRun {
    pub id: i32,
    pub result_id: i32,
    pub build_id: i64,
}

impl TestRun {
    pub fn result(&self) -> Result<TestResult> {
        TestResult::from_ordinal(self.result_id)
    }

    pub fn count(connection: &mut SqliteConnection) -> Result<i64> {
        use crate::schema::test_run::dsl::*;
        let count = test_run.count().get_result(connection)?;
        Ok(count)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = test_run)]
pub struct NewTestRun {
    pub result_id: i32,
    pub build_id: i64,
}

impl NewTestRun {
    pub fn new(result: TestResult, build_id: i64) -> NewTestRun {
        NewTestRun {
            result_id: result.ordinal(),
            build_id,
        }
    }

    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<TestRun> {
        let run = diesel::insert_into(test_run::table)
            .values(self)
            .returning(TestRun::as_select())
            .get_result::<TestRun>(connection)?;
        Ok(run)
    }
}
