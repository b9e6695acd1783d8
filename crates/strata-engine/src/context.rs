//! Shared state of one build
//!
//! A [`BuildContext`] is created per build and passed explicitly to the
//! loader and the builder. It owns the remote fetch cache, the memo table of
//! built units and the observable state of every unit.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use strata_core::ResourceSet;
use strata_repo::RemoteCache;
use tokio::sync::{OnceCell, Semaphore};

/// Lifecycle of a unit within a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Unresolved,
    Loading,
    BasesBuilding,
    LocalResourcesAssembling,
    Generating,
    Transforming,
    Patching,
    Replacing,
    Built,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Unresolved => "unresolved",
            UnitState::Loading => "loading",
            UnitState::BasesBuilding => "bases-building",
            UnitState::LocalResourcesAssembling => "local-resources-assembling",
            UnitState::Generating => "generating",
            UnitState::Transforming => "transforming",
            UnitState::Patching => "patching",
            UnitState::Replacing => "replacing",
            UnitState::Built => "built",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type MemoCell = Arc<OnceCell<Arc<ResourceSet>>>;

/// Per-build shared state
pub struct BuildContext {
    cache: Arc<RemoteCache>,
    memo: Mutex<HashMap<String, MemoCell>>,
    states: Mutex<IndexMap<String, UnitState>>,
    builds: AtomicUsize,
    permits: Arc<Semaphore>,
}

impl BuildContext {
    pub fn new(cache: Arc<RemoteCache>, max_parallel: usize) -> Self {
        Self {
            cache,
            memo: Mutex::new(HashMap::new()),
            states: Mutex::new(IndexMap::new()),
            builds: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    pub fn cache(&self) -> &RemoteCache {
        &self.cache
    }

    /// Bounds how many unit pipelines run at once
    pub fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    /// The memo cell for a unit digest, created on first use
    pub(crate) fn memo_cell(&self, digest: &str) -> MemoCell {
        lock(&self.memo)
            .entry(digest.to_string())
            .or_default()
            .clone()
    }

    pub(crate) fn record_build(&self) {
        self.builds.fetch_add(1, Ordering::Relaxed);
    }

    /// How many unit pipelines actually ran
    pub fn units_built(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, unit: &str, state: UnitState) {
        tracing::debug!(unit, state = %state, "unit state");
        lock(&self.states).insert(unit.to_string(), state);
    }

    pub fn state_of(&self, unit: &str) -> Option<UnitState> {
        lock(&self.states).get(unit).copied()
    }

    /// Every unit seen so far, in discovery order
    pub fn states(&self) -> IndexMap<String, UnitState> {
        lock(&self.states).clone()
    }
}

/// A poisoned table is still consistent: every write is a single insert
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
