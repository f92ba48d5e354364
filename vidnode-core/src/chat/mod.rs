pub mod filter;
pub mod identity;
pub mod rate_limit;

pub use filter::{ContentFilter, ContentFilterError};
pub use identity::ChatIdentity;
pub use rate_limit::{ChatRateLimiter, LimiterState, RateDecision};
