//! Proxy module
//!
//! Everything needed to reach an upstream provider: URL rules, headers,
//! the outbound client pool, retry policy and per-request logging.

pub mod headers;
pub mod logging;
pub mod retry;
pub mod upstream;
pub mod vendor;

pub use logging::{RelayStage, RequestContext};
pub use retry::RetryPolicy;
pub use upstream::{upstream_url, AttemptError, UpstreamClient};
pub use vendor::VendorProfile;
