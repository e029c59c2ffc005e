pub mod clock;
pub mod identity;
pub mod limiter;
pub mod proxy;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use identity::{client_key, IdentityExtractor};
pub use limiter::RateLimiter;
pub use proxy::{strip_hop_headers, UpstreamClient};
pub use store::{MemoryStore, RateLimitStore};
