//! Rate limiting logic and state management.

mod clock;
mod headers;
mod key;
mod limiter;
mod registry;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::{
    RateLimitHeaders, RateLimitResult, LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER,
    RETRY_AFTER_HEADER,
};
pub use key::{client_ip, user_key, HeaderSource, UNKNOWN_CLIENT};
pub use limiter::{RateLimiter, DEFAULT_SWEEP_INTERVAL};
pub use registry::{LimiterRegistry, NamedLimiter, USER_ID_HEADER};
pub use window::{LimiterConfig, WindowEntry};
