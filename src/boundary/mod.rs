//! Request boundary: authentication, validation, rate limiting and the
//! axum handlers that tie them to `QueueService`. §4.L.

pub mod auth;
pub mod handlers;
pub mod rate_limit;
pub mod validation;

pub use auth::{AuthUser, SessionStore, SharedSessionStore, VenueOwner};
pub use rate_limit::{RateLimiter, SharedRateLimiter};
