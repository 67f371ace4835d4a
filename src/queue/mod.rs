//! Outbound request admission and retry backoff.
//!
//! Every call to the embedding provider and vector index goes through one
//! [`RequestQueue`] per ingestion run, so the total request rate stays under
//! the provider's ceiling however many workers are active.

mod backoff;
mod rate_limiter;

pub use backoff::BackoffPolicy;
pub use rate_limiter::{QueueConfig, QueueStatus, RequestQueue, WINDOW};
