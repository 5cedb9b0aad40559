use crate::schema::*;
use diesel::prelude::*;
use patchgate_common::errors::*;

/// A build that was handed to an executor and is still awaiting its result
#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = pending_job)]
pub struct PendingJob {
    pub id: i32,
    pub job_name: String,
    pub build_id: i64,
}

impl PendingJob {
    pub fn list(connection: &mut SqliteConnection) -> Result<Vec<PendingJob>> {
        use crate::schema::pending_job::dsl::*;
        let items = pending_job
            .order_by(id)
            .select(PendingJob::as_select())
            .load(connection)?;
        Ok(items)
    }

    pub fn get_id(my_id: i32, connection: &mut SqliteConnection) -> Result<Option<PendingJob>> {
        use crate::schema::pending_job::dsl::*;
        let item = pending_job
            .filter(id.eq(my_id))
            .select(PendingJob::as_select())
            .first(connection)
            .optional()?;
        Ok(item)
    }

    pub fn delete_id(my_id: i32, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::pending_job::dsl::*;
        diesel::delete(pending_job.filter(id.eq(my_id))).execute(connection)?;
        Ok(())
    }

    /// Delete jobs in `ids` that no longer own any pending patch
    pub fn delete_orphaned(ids: &[i32], connection: &mut SqliteConnection) -> Result<Vec<i32>> {
        let mut orphaned = Vec::new();
        for job_id in ids {
            let owned = pending_patch::table
                .filter(pending_patch::pendingjob_id.eq(job_id))
                .count()
                .get_result::<i64>(connection)?;
            if owned == 0 {
                Self::delete_id(*job_id, connection)?;
                orphaned.push(*job_id);
            }
        }
        Ok(orphaned)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = pending_job)]
pub struct NewPendingJob<'a> {
    pub job_name: &'a str,
    pub build_id: i64,
}

impl NewPendingJob<'_> {
    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<PendingJob> {
        let job = diesel::insert_into(pending_job::table)
            .values(self)
            .returning(PendingJob::as_select())
            .get_result::<PendingJob>(connection)?;
        Ok(job)
    }
}
