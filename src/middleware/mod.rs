//! HTTP middleware turning throttle decisions into responses.

mod identity;
mod layer;
pub mod response;

pub use identity::{BasicAuthIdentity, ExtensionIdentity, IdentityOutcome, IdentitySource};
pub use layer::{ThrottleLayer, ThrottleService};
