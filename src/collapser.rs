use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::error::CollapseError;
use crate::result::TaskResult;
use crate::slot::{InFlight, Registry, Round, Slot, lock};

/// Collapses concurrent calls that share a key into a single execution.
///
/// The first caller for a key becomes the round's leader and runs the function. Every caller that
/// arrives with the same key while the leader is still running blocks until the leader is done,
/// then receives the very same [`TaskResult`]. Calls that do not overlap are never collapsed: each
/// one starts a fresh round.
pub struct Collapser<K, T> {
    tasks: Registry<K, Slot<T>>,
}

impl<K, T> Default for Collapser<K, T> {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> Collapser<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` unless a call with an equal `key` is already running, in which case this blocks
    /// until that call finishes and shares its result.
    ///
    /// A panic inside `f` does not escape: it is published as [`CollapseError::Panicked`] to every
    /// caller of the round.
    pub fn do_call<F>(&self, key: K, f: F) -> Arc<TaskResult<T>>
    where
        F: FnOnce() -> T,
    {
        self.run(key, || {
            panic::catch_unwind(AssertUnwindSafe(f)).map_err(CollapseError::from_panic)
        })
    }

    /// Like [`do_call`](Self::do_call) for fallible functions.
    ///
    /// An `Err` is published as [`CollapseError::Failed`] and handed to every caller of the round.
    /// Nothing is retried: the next non-overlapping call simply starts a new round.
    pub fn try_do_call<F, E>(&self, key: K, f: F) -> Arc<TaskResult<T>>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<anyhow::Error>,
    {
        self.run(key, || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CollapseError::from_failure(err)),
            Err(payload) => Err(CollapseError::from_panic(payload)),
        })
    }

    fn run<F>(&self, key: K, f: F) -> Arc<TaskResult<T>>
    where
        F: FnOnce() -> Result<T, CollapseError>,
    {
        let mut tasks = lock(&self.tasks);
        if let Some(slot) = tasks.get(&key).map(Arc::clone) {
            drop(tasks);

            let callers = slot.result().join();
            tracing::trace!("Joined round for key {:?} as caller {}", key, callers);
            slot.wait();
            return Arc::clone(slot.result());
        }

        let slot = Arc::new(Slot::new());
        let hold = slot.hold();
        tasks.insert(key.clone(), Arc::clone(&slot));
        drop(tasks);

        tracing::debug!("Opened round for key {:?}", key);
        let round = Round::new(&self.tasks, key, Arc::clone(&slot), hold);
        round.result().join();
        round.publish(f());

        let result = Arc::clone(round.result());
        drop(round);
        result
    }

    /// Number of keys with a round currently running.
    pub fn in_flight(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.tasks).contains_key(key)
    }

    /// Callers attached so far to the round running for `key`, if there is one.
    pub fn in_flight_callers(&self, key: &K) -> Option<u64> {
        lock(&self.tasks)
            .get(key)
            .map(|slot| slot.result().collapsed())
    }
}
