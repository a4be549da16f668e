use thiserror::Error;

/// Crate-wide error type.
///
/// Validation failures and recoverable transport/exchange errors surface as
/// `Err` plus a log event; invariant violations inside the reactor are logged
/// and swallowed so the event loop stays live.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Order request rejected before any state mutation
    #[error("validation error: {0}")]
    Validation(String),

    /// Transport-level failure (timeout, 5xx, channel closed)
    #[error("transport error: {0}")]
    Transport(String),

    /// Exchange-side semantic error (balance, cancel-reject, unknown order)
    #[error("exchange error: {0}")]
    Exchange(String),

    /// Bad daemon configuration
    #[error("config error: {0}")]
    Config(String),

    /// Saved-index or settings parse failure
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem failure while saving or loading a market index
    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
