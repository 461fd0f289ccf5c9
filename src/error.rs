use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// Failure published to every caller of a round that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum CollapseError {
    /// The leader's function panicked.
    #[error("collapsed function panicked: {0}")]
    Panicked(Arc<str>),

    /// The leader's fallible function returned an error.
    #[error("collapsed function failed: {0:#}")]
    Failed(Arc<anyhow::Error>),

    /// The leader went away before publishing anything.
    #[error("collapsed function was abandoned before completing")]
    Abandoned,

    /// The result was read before the leader published it.
    #[error("result has not been published yet")]
    Pending,
}

impl CollapseError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message: Arc<str> = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else {
            Arc::from("non-string panic payload")
        };
        Self::Panicked(message)
    }

    pub(crate) fn from_failure<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Failed(Arc::new(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_keep_their_message() {
        let err = CollapseError::from_panic(Box::new("boom"));
        assert!(matches!(&err, CollapseError::Panicked(msg) if &**msg == "boom"));

        let err = CollapseError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "collapsed function panicked: owned boom");

        let err = CollapseError::from_panic(Box::new(7_u32));
        assert_eq!(
            err.to_string(),
            "collapsed function panicked: non-string panic payload"
        );
    }

    #[test]
    fn failures_render_the_whole_chain() {
        let err = anyhow::anyhow!("connection refused").context("query failed");
        let err = CollapseError::from_failure(err);
        assert_eq!(
            err.to_string(),
            "collapsed function failed: query failed: connection refused"
        );
    }

    #[test]
    fn clones_share_the_same_failure() {
        let err = CollapseError::from_failure(anyhow::anyhow!("boom"));
        let cloned = err.clone();
        let (CollapseError::Failed(a), CollapseError::Failed(b)) = (&err, &cloned) else {
            panic!("expected failures");
        };
        assert!(Arc::ptr_eq(a, b));
    }
}
