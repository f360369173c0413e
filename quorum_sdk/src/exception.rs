//! Error taxonomy shared by the session coordinator and the state manager.
//!
//! Every variant renders as a single human-readable line; none of them is fatal
//! to the process. Protocol errors end the session they occurred in, the
//! others leave it untouched.

use thiserror::Error;

pub type Outcome<T> = Result<T, CoordError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("another session is already active for {0}")]
    SessionAlreadyActive(String),

    #[error("session {0} timed out waiting for peers")]
    QuorumTimeout(String),

    #[error("computation failed: {0}")]
    ComputationFailed(String),

    #[error("failed to persist state: {0}")]
    PersistenceFailed(String),

    #[error("channel disconnected")]
    ChannelDisconnected,

    #[error("identity service unavailable: {0}")]
    IdentityUnavailable(String),
}

impl CoordError {
    /// Protocol errors terminate the session that raised them.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            CoordError::SessionNotFound(_)
                | CoordError::SessionClosed(_)
                | CoordError::QuorumTimeout(_)
                | CoordError::ComputationFailed(_)
                | CoordError::ChannelDisconnected
        )
    }
}

/// Shortcut for turning foreign errors into a taxonomy variant, in the spirit of
/// `result.catch(..)?` at call sites.
pub trait CatchAs<T> {
    fn or_persistence(self, ctx: &str) -> Outcome<T>;
    fn or_invalid(self, ctx: &str) -> Outcome<T>;
}

impl<T, E> CatchAs<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_persistence(self, ctx: &str) -> Outcome<T> {
        self.map_err(|e| CoordError::PersistenceFailed(format!("{ctx} -- {e}")))
    }

    fn or_invalid(self, ctx: &str) -> Outcome<T> {
        self.map_err(|e| CoordError::InvalidParameters(format!("{ctx} -- {e}")))
    }
}

#[macro_export]
macro_rules! assert_throw {
    ($cond:expr, $variant:ident, $($arg:tt)+) => {
        if !($cond) {
            return Err($crate::exception::CoordError::$variant(format!($($arg)+)));
        }
    };
}
