use thiserror::Error;

/// Errors raised by pure domain logic (parsing, validation).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown {kind} value: {value:?}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Invalid CIDR: {0:?}")]
    InvalidCidr(String),
}
