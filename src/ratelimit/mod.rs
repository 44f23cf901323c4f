//! Rate limiting logic: windows, keys, quota evaluation and decisions.

mod decider;
mod key;
mod policy;
mod window;

pub use decider::{Decision, ThrottleDecider, ThrottleDeciderBuilder};
pub use key::{Identity, IdentityWindowKey, KeyFn, KeyGenerator, KeyStrategy, RateLimitKey, RequestContext};
pub use policy::{RateLimitPolicy, Verdict, DEFAULT_REQUESTS_PER_LIMIT};
pub use window::TimeWindow;
