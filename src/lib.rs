//! Quotagate - In-Process Admission Control
//!
//! This crate decides, per request, whether an application may call an API
//! route right now. Quotas are configured per `(app_id, api)` pair and
//! enforced by one of four counting algorithms: fixed window, sliding window,
//! token bucket or leaky bucket. All state is process-local.
//!
//! ```
//! use quotagate::ratelimit::{Decision, QuotaRule, RateLimiter};
//!
//! let limiter = RateLimiter::new();
//! limiter.add_rule(QuotaRule::new("app1", "/v1/order", 3, 1).unwrap());
//!
//! assert_eq!(limiter.admit("app1", "/v1/order").unwrap(), Decision::Admitted);
//! assert_eq!(limiter.admit("appX", "/unknown").unwrap(), Decision::Admitted);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod idempotence;
pub mod ratelimit;
pub mod reload;
