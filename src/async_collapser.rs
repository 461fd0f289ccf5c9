use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt as _;

use crate::error::CollapseError;
use crate::result::TaskResult;
use crate::slot::{AsyncSlot, InFlight, Registry, Round, lock};

/// Async flavour of [`Collapser`](crate::Collapser) for callers running as tokio tasks.
///
/// Followers wait without blocking their worker thread. If the leader's future is dropped before
/// it completes, its followers wake up with [`CollapseError::Abandoned`].
pub struct AsyncCollapser<K, T> {
    tasks: Registry<K, AsyncSlot<T>>,
}

impl<K, T> Default for AsyncCollapser<K, T> {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> AsyncCollapser<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaits the future built by `f`, unless a call with an equal `key` is already in flight, in
    /// which case this waits for that call and shares its result.
    pub async fn do_call<F, Fut>(&self, key: K, f: F) -> Arc<TaskResult<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // `f` runs inside the unwind boundary so a panic while building the future is caught too.
        let fut = AssertUnwindSafe(async move { f().await }).catch_unwind();
        self.run(key, async move { fut.await.map_err(CollapseError::from_panic) })
            .await
    }

    /// Like [`do_call`](Self::do_call) for fallible futures.
    pub async fn try_do_call<F, Fut, E>(&self, key: K, f: F) -> Arc<TaskResult<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let fut = AssertUnwindSafe(async move { f().await }).catch_unwind();
        self.run(key, async move {
            match fut.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(CollapseError::from_failure(err)),
                Err(payload) => Err(CollapseError::from_panic(payload)),
            }
        })
        .await
    }

    async fn run<Fut>(&self, key: K, fut: Fut) -> Arc<TaskResult<T>>
    where
        Fut: Future<Output = Result<T, CollapseError>>,
    {
        let (fresh, hold) = AsyncSlot::held().await;

        let existing = {
            let mut tasks = lock(&self.tasks);
            match tasks.get(&key) {
                Some(slot) => Some(Arc::clone(slot)),
                None => {
                    tasks.insert(key.clone(), Arc::clone(&fresh));
                    None
                }
            }
        };

        if let Some(slot) = existing {
            drop(hold);

            let callers = slot.result().join();
            tracing::trace!("Joined round for key {:?} as caller {}", key, callers);
            slot.wait().await;
            return Arc::clone(slot.result());
        }

        tracing::debug!("Opened round for key {:?}", key);
        let round = Round::new(&self.tasks, key, fresh, hold);
        round.result().join();
        round.publish(fut.await);

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
