//! Error taxonomy (§7). Every kind here maps to a single distinguishable
//! sentinel so callers can match on `CoreError` variants instead of
//! string-sniffing messages.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Caller bug: nil dependency, empty required id at a trusted boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed inbound request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Subject/password mismatch or absent user. Hides which field failed.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Internal-to-credentials; promoted to `InvalidCredentials` at the
    /// provider boundary. Kept as a distinct variant so providers can
    /// match on it before translating.
    #[error("password mismatch")]
    PasswordMismatch,

    #[error("missing password hash")]
    MissingPasswordHash,

    #[error("wrong auth kind")]
    WrongAuthKind,

    /// Any refresh-path failure except revocation. Hides which check failed.
    #[error("invalid refresh token")]
    InvalidRefresh,

    /// Refresh on a revoked session.
    #[error("session revoked")]
    Revoked,

    /// Empty effective permission set, or policy denial.
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid token")]
    InvalidToken,

    #[error("expired token")]
    ExpiredToken,

    #[error("rate limited")]
    RateLimited,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("already started")]
    AlreadyStarted,
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for the storage "row doesn't exist" sentinel specifically.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
