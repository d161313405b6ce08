use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Error taxonomy shared by the whole crate.
///
/// Venue adapters map transport and protocol failures into this enum and
/// never leak native library errors above their boundary.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("currency mismatch: {0}")]
    CurrencyMismatch(String),

    #[error("fixed-point overflow: {0}")]
    Overflow(String),

    #[error("a neutral amount is required: {0}")]
    NeutralRequired(String),

    #[error("separator character in key or value: {0}")]
    DuplicateSeparatorInValue(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("venue protocol error on {venue}: {reason}")]
    VenueProtocol { venue: &'static str, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation unsupported by venue: {0}")]
    Capability(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),
}

impl ExchangeError {
    /// Process exit code associated with this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExchangeError::InvalidArgument(_) => 2,
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Parse(err.to_string())
    }
}
