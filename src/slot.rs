//! Per-key invocation slots and the guard that closes a round.
//!
//! A slot's gate is a reader/writer lock used as a one-shot broadcast: the leader takes the write
//! side when the slot is created and drops it once the outcome is published, followers take the
//! read side and let go of it straight away.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};

use tokio::sync::{OwnedRwLockWriteGuard, RwLock as AsyncRwLock};

use crate::error::CollapseError;
use crate::result::TaskResult;

/// Key to in-flight slot mapping. The lock only ever covers map operations.
pub(crate) type Registry<K, S> = Mutex<HashMap<K, Arc<S>>>;

pub(crate) fn lock<K, S>(tasks: &Registry<K, S>) -> MutexGuard<'_, HashMap<K, Arc<S>>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Anything registered for a key while its round is running.
pub(crate) trait InFlight {
    type Output;

    fn result(&self) -> &Arc<TaskResult<Self::Output>>;
}

/// Slot for callers blocking on an OS thread.
pub(crate) struct Slot<T> {
    gate: RwLock<()>,
    result: Arc<TaskResult<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            gate: RwLock::new(()),
            result: Arc::new(TaskResult::new()),
        }
    }

    /// Take the exclusive side of the gate. Called once, by the leader.
    pub(crate) fn hold(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the leader lets go of the gate.
    pub(crate) fn wait(&self) {
        drop(self.gate.read().unwrap_or_else(PoisonError::into_inner));
    }
}

impl<T> InFlight for Slot<T> {
    type Output = T;

    fn result(&self) -> &Arc<TaskResult<T>> {
        &self.result
    }
}

/// Slot for callers running as tokio tasks.
pub(crate) struct AsyncSlot<T> {
    gate: Arc<AsyncRwLock<()>>,
    result: Arc<TaskResult<T>>,
}

impl<T> AsyncSlot<T> {
    /// Create a slot whose gate is already held by the caller.
    pub(crate) async fn held() -> (Arc<Self>, OwnedRwLockWriteGuard<()>) {
        let gate = Arc::new(AsyncRwLock::new(()));
        // Nobody else can see this lock yet, so this resolves on the first poll.
        let hold = Arc::clone(&gate).write_owned().await;
        let slot = Self {
            gate,
            result: Arc::new(TaskResult::new()),
        };
        (Arc::new(slot), hold)
    }

    pub(crate) async fn wait(&self) {
        drop(self.gate.read().await);
    }
}

impl<T> InFlight for AsyncSlot<T> {
    type Output = T;

    fn result(&self) -> &Arc<TaskResult<T>> {
        &self.result
    }
}

/// Owned by the leader for as long as its round runs.
///
/// Dropping the round, whether after a normal publish, during unwinding or because an async leader
/// was cancelled, always:
///
/// 1. publishes [`CollapseError::Abandoned`] if nothing was published yet,
/// 2. releases the gate so that every follower wakes up,
/// 3. removes the key from the registry, provided it still points at this round's slot.
pub(crate) struct Round<'a, K, S, H>
where
    K: Eq + Hash + Debug,
    S: InFlight,
{
    tasks: &'a Registry<K, S>,
    key: K,
    slot: Arc<S>,
    hold: Option<H>,
}

impl<'a, K, S, H> Round<'a, K, S, H>
where
    K: Eq + Hash + Debug,
    S: InFlight,
{
    pub(crate) fn new(tasks: &'a Registry<K, S>, key: K, slot: Arc<S>, hold: H) -> Self {
        Self {
            tasks,
            key,
            slot,
            hold: Some(hold),
        }
    }

    pub(crate) fn result(&self) -> &Arc<TaskResult<S::Output>> {
        self.slot.result()
    }

    pub(crate) fn publish(&self, outcome: Result<S::Output, CollapseError>) {
        if let Err(err) = &outcome {
            tracing::warn!("Round for key {:?} failed: {}", self.key, err);
        }
        self.slot.result().publish(outcome);
    }
}

impl<K, S, H> Drop for Round<'_, K, S, H>
where
    K: Eq + Hash + Debug,
    S: InFlight,
{
    fn drop(&mut self) {
        let result = self.slot.result();
        if result.publish(Err(CollapseError::Abandoned)) {
            tracing::warn!("Round for key {:?} abandoned before publishing", self.key);
        }

        drop(self.hold.take());

        let mut tasks = lock(self.tasks);
        if tasks
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            tasks.remove(&self.key);
        }
        drop(tasks);

        tracing::debug!(
            "Closed round for key {:?} after collapsing {} calls",
            self.key,
            result.collapsed()
        );
    }
}
