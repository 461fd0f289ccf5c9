use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CollapseError;

/// Outcome of one collapsed round, shared by every caller that took part in it.
#[derive(Debug)]
pub struct TaskResult<T> {
    outcome: OnceLock<Result<T, CollapseError>>,
    collapsed: AtomicU64,
}

impl<T> TaskResult<T> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            collapsed: AtomicU64::new(0),
        }
    }

    /// Count one more caller into this round, returning the new total.
    pub(crate) fn join(&self) -> u64 {
        self.collapsed.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Store the round's outcome. Only the first publication sticks.
    pub(crate) fn publish(&self, outcome: Result<T, CollapseError>) -> bool {
        self.outcome.set(outcome).is_ok()
    }

    /// Returns the value produced by the round's leader.
    ///
    /// Every caller of a failed round gets the same [`CollapseError`].
    pub fn get(&self) -> Result<&T, CollapseError> {
        match self.outcome.get() {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(err.clone()),
            None => Err(CollapseError::Pending),
        }
    }

    /// Returns the published outcome, or `None` if the leader has not finished.
    pub fn outcome(&self) -> Option<&Result<T, CollapseError>> {
        self.outcome.get()
    }

    /// Returns the number of callers served by this round.
    #[must_use]
    pub fn collapsed(&self) -> u64 {
        self.collapsed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_before_publish_is_pending() {
        let result = TaskResult::<u32>::new();
        assert!(matches!(result.get(), Err(CollapseError::Pending)));
        assert!(result.outcome().is_none());
        assert_eq!(result.collapsed(), 0);
    }

    #[test]
    fn publish_is_write_once() {
        let result = TaskResult::new();
        assert!(result.publish(Ok(42)));
        assert!(!result.publish(Ok(7)));
        assert!(!result.publish(Err(CollapseError::Abandoned)));
        assert_eq!(*result.get().unwrap(), 42);
        assert!(result.outcome().is_some());
    }

    #[test]
    fn join_counts_every_caller() {
        let result = TaskResult::<()>::new();
        assert_eq!(result.join(), 1);
        assert_eq!(result.join(), 2);
        assert_eq!(result.join(), 3);
        assert_eq!(result.collapsed(), 3);
    }

    #[test]
    fn failures_are_returned_to_each_reader() {
        let result = TaskResult::<u32>::new();
        result.publish(Err(CollapseError::Abandoned));
        assert!(matches!(result.get(), Err(CollapseError::Abandoned)));
        assert!(matches!(result.get(), Err(CollapseError::Abandoned)));
    }
}
