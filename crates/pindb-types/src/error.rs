use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown wire type tag: {0}")]
    UnknownWireType(u8),

    #[error("unknown operation code: {0}")]
    UnknownOpCode(u8),

    #[error("timestamp out of range: {0} store microseconds")]
    TimestampOutOfRange(i64),
}
