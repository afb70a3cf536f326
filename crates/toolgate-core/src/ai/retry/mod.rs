//! Retry logic for backend calls
//!
//! Exponential backoff with jitter for transient failures: connection errors,
//! rate limiting (429) and server errors (500, 502, 503, 504).

mod backoff;

pub use backoff::{is_retryable_status, with_retry, IsRetryable, RetryConfig};
