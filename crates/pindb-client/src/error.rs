use pindb_proto::ProtocolError;
use pindb_types::Pid;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed mutation parameters. Always local, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation requires a store-assigned identifier that is absent.
    #[error("operation requires a persisted PIN")]
    NotPersisted,

    /// Collection index or length inconsistency.
    #[error("index {index} out of range ({len} elements)")]
    OutOfRange { index: usize, len: usize },

    /// The store no longer holds the referenced PIN.
    #[error("PIN not found: {0}")]
    PinNotFound(Pid),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

pub type ClientResult<T> = Result<T, ClientError>;
