//! Resilience patterns for the Airtable API.
//!
//! Every exchange passes the per-base [`RateLimiter`] before it is sent and
//! the [`RetryPolicy`] after it fails.

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{Admission, RateLimiter};
pub use retry::{calculate_backoff, DefaultRetryPolicy, RetryDecision, RetryPolicy};
