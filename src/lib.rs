//! Function call deduplication.
//!
//! Under load an application can end up with many threads or tasks making the very same expensive
//! call at the same time. A [`Collapser`] (or [`AsyncCollapser`] for tokio tasks) lets the first of
//! them run the call while the rest wait for it and then share its [`TaskResult`].
//!
//! Collapsing only applies to calls that overlap in time. Nothing is cached once a call finishes.

mod async_collapser;
mod collapser;
mod error;
mod result;
mod slot;

pub use async_collapser::AsyncCollapser;
pub use collapser::Collapser;
pub use error::CollapseError;
pub use result::TaskResult;
