//! Authentication & session core: token codec, refresh primitive, RBAC
//! resolver, rate limiter, password provider, and the session service
//! that orchestrates them (C2–C7).

pub mod password;
pub mod rate_limit;
pub mod rbac;
pub mod refresh;
pub mod session;
pub mod token;

pub use password::{CredentialProvider, PasswordProvider};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use rbac::RbacResolver;
pub use session::{SessionConfig, SessionService, TokenPair};
pub use token::{Algorithm, TokenCodec};
