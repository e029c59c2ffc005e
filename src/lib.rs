pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod server;
pub mod services;

pub use config::GatewayConfig;
pub use errors::GatewayError;
pub use models::{AppState, ClientKey, IdentityHint, RateLimitStatus, RateWindow, RequestContext};
pub use server::routes;
