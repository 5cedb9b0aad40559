use crate::schema::*;
use diesel::dsl::min;
use diesel::prelude::*;
use patchgate_common::errors::*;

#[derive(Identifiable, Queryable, Selectable, Clone, PartialEq, Eq, Debug)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = pending_patch)]
pub struct PendingPatch {
    pub id: i32,
    pub patch_id: i64,
    pub pendingjob_id: Option<i32>,
    pub timestamp: i64,
}

impl PendingPatch {
    pub fn get_patch(my_patch_id: i64, connection: &mut SqliteConnection) -> Result<Option<PendingPatch>> {
        use crate::schema::pending_patch::dsl::*;
        let item = pending_patch
            .filter(patch_id.eq(my_patch_id))
            .select(PendingPatch::as_select())
            .first(connection)
            .optional()?;
        Ok(item)
    }

    pub fn list_for_job(job_id: i32, connection: &mut SqliteConnection) -> Result<Vec<i64>> {
        use crate::schema::pending_patch::dsl::*;
        let ids = pending_patch
            .filter(pendingjob_id.eq(job_id))
            .order_by(patch_id)
            .select(patch_id)
            .load::<i64>(connection)?;
        Ok(ids)
    }

    pub fn delete_for_job(job_id: i32, connection: &mut SqliteConnection) -> Result<usize> {
        use crate::schema::pending_patch::dsl::*;
        let n = diesel::delete(pending_patch.filter(pendingjob_id.eq(job_id))).execute(connection)?;
        Ok(n)
    }

    pub fn delete_patches(patch_ids: &[i64], connection: &mut SqliteConnection) -> Result<usize> {
        use crate::schema::pending_patch::dsl::*;
        let n = diesel::delete(pending_patch.filter(patch_id.eq_any(patch_ids))).execute(connection)?;
        Ok(n)
    }

    /// Unlink the patches from their job so the next expiry check submits them again
    pub fn detach_from_job(job_id: i32, connection: &mut SqliteConnection) -> Result<usize> {
        use crate::schema::pending_patch::dsl::*;
        let n = diesel::update(pending_patch.filter(pendingjob_id.eq(job_id)))
            .set((pendingjob_id.eq(None::<i32>), timestamp.eq(0)))
            .execute(connection)?;
        Ok(n)
    }

    /// Jobs currently owning any of the given patches
    pub fn owners(patch_ids: &[i64], connection: &mut SqliteConnection) -> Result<Vec<i32>> {
        use crate::schema::pending_patch::dsl::*;
        let mut owners = pending_patch
            .filter(patch_id.eq_any(patch_ids))
            .filter(pendingjob_id.is_not_null())
            .select(pendingjob_id.assume_not_null())
            .distinct()
            .load::<i32>(connection)?;
        owners.sort_unstable();
        Ok(owners)
    }

    /// Pending patches of a source that were marked before `deadline`
    pub fn expired(my_source_id: i32, deadline: i64, connection: &mut SqliteConnection) -> Result<Vec<i64>> {
        let ids = pending_patch::table
            .inner_join(patch::table)
            .filter(patch::source_id.eq(my_source_id))
            .filter(pending_patch::timestamp.le(deadline))
            .order_by(pending_patch::patch_id)
            .select(pending_patch::patch_id)
            .load::<i64>(connection)?;
        Ok(ids)
    }

    /// When the longest waiting patch of a job was marked pending
    pub fn pending_since(job_id: i32, connection: &mut SqliteConnection) -> Result<Option<i64>> {
        use crate::schema::pending_patch::dsl::*;
        let since = pending_patch
            .filter(pendingjob_id.eq(job_id))
            .select(min(timestamp))
            .first::<Option<i64>>(connection)?;
        Ok(since)
    }

    pub fn count(connection: &mut SqliteConnection) -> Result<i64> {
        use crate::schema::pending_patch::dsl::*;
        let count = pending_patch.count().get_result(connection)?;
        Ok(count)
    }
}

#[derive(Insertable, PartialEq, Eq, Debug, Clone)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(table_name = pending_patch)]
pub struct NewPendingPatch {
    pub patch_id: i64,
    pub pendingjob_id: Option<i32>,
    pub timestamp: i64,
}

impl NewPendingPatch {
    /// Mark the patch as pending, moving it over if another job already owns it
    pub fn upsert(&self, connection: &mut SqliteConnection) -> Result<()> {
        use crate::schema::pending_patch::*;

        diesel::insert_into(table)
            .values(self)
            .on_conflict(patch_id)
            .do_update()
            .set((
                pendingjob_id.eq(diesel::upsert::excluded(pendingjob_id)),
                timestamp.eq(diesel::upsert::excluded(timestamp)),
            ))
            .execute(connection)?;

        Ok(())
    }
}
