use pindb_types::{TypeError, WireType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("segment too large: {size} bytes (max {max})")]
    SegmentTooLarge { size: usize, max: usize },

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("property name not in dictionary: {0}")]
    PropertyNotPrepared(String),

    #[error("payload does not match wire type {wtype:?}: got {payload}")]
    PayloadMismatch { wtype: WireType, payload: &'static str },

    #[error("timestamp out of range: {0} store microseconds")]
    InvalidTimestamp(i64),

    #[error("value arrived without a concrete wire type")]
    UntypedValue,
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
