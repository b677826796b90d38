//! HTTP surface for rate limit decisions.

mod middleware;
mod server;
mod service;

pub use middleware::{apply_rate_limit_headers, rate_limit_middleware, too_many_requests};
pub use server::HttpServer;
pub use service::{router, AppState, CheckRequest, GUARDED_POLICY};
