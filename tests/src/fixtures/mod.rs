pub mod fakes;

use crate::data::*;
use crate::fixtures::fakes::*;
use patchgate::engine::Engine;
use patchgate::filter::{AcceptAll, SeriesFilter, Verdict};
use patchgate::store::Store;
use rstest::fixture;
use tempfile::TempDir;

/// An engine on a throwaway database, wired to fakes the test can still reach
pub struct IsolatedEngine {
    pub engine: Engine,
    pub store: Store,
    pub source: FakeSource,
    pub executor: FakeExecutor,
    pub clock: ManualClock,
    _dir: TempDir,
}

impl IsolatedEngine {
    pub fn new(filter: Box<dyn SeriesFilter>) -> IsolatedEngine {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchgate.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();

        let source = FakeSource::new(DUMMY_PATCHWORK, DUMMY_PROJECT_ID);
        let executor = FakeExecutor::new(DUMMY_JOB_NAME);
        let clock = ManualClock::new(start_time());

        let mut engine = Engine::new(store.clone(), Box::new(executor.clone()), filter, engine_config())
            .with_clock(Box::new(clock.clone()));
        engine
            .add_source(Box::new(source.clone()), Some(tracked_since()))
            .unwrap();

        IsolatedEngine {
            engine,
            store,
            source,
            executor,
            clock,
            _dir: dir,
        }
    }
}

#[fixture]
pub fn isolated_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patchgate.db");
    let store = Store::open(path.to_str().unwrap()).unwrap();
    (dir, store)
}

#[fixture]
pub fn isolated_engine() -> IsolatedEngine {
    IsolatedEngine::new(Box::new(AcceptAll))
}

#[fixture]
pub fn rejecting_engine() -> IsolatedEngine {
    IsolatedEngine::new(Box::new(FixedFilter(Some(Verdict::Reject))))
}

#[fixture]
pub fn broken_filter_engine() -> IsolatedEngine {
    IsolatedEngine::new(Box::new(FixedFilter(None)))
}
