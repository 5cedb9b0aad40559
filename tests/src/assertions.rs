use patchgate::store::Store;

pub fn assert_patch_pending_for(store: &Store, patch_id: i64, job_id: i32, timestamp: i64) {
    let pending = store.pending_patch(patch_id).unwrap().unwrap();
    assert_eq!(pending.pendingjob_id, Some(job_id));
    assert_eq!(pending.timestamp, timestamp);
}

pub fn assert_patch_detached(store: &Store, patch_id: i64) {
    let pending = store.pending_patch(patch_id).unwrap().unwrap();
    assert_eq!(pending.pendingjob_id, None);
    assert_eq!(pending.timestamp, 0);
}

pub fn assert_nothing_pending(store: &Store) {
    assert!(store.list_pending_jobs().unwrap().is_empty());
    let (_, pending, _) = store.counts().unwrap();
    assert_eq!(pending, 0);
}
