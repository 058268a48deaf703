//! Wire protocol for the PinDB client driver.
//!
//! A wire message is a concatenation of independently framed segments; each
//! segment body is a [`WireStream`] carrying dictionary updates, PIN
//! mutation records, statements, transaction-control markers, or flush
//! markers. This crate owns the segment model, the native-value marshaler,
//! the per-transaction property dictionary, and the framing codec. It never
//! performs I/O and never interprets query text.

pub mod codec;
pub mod dict;
pub mod error;
pub mod marshal;
pub mod stream;

pub use codec::SegmentCodec;
pub use dict::{PropertyDictionary, ReadContext};
pub use error::{ProtocolError, ProtocolResult};
pub use marshal::{decode, encode, to_wire_value, Decoded};
pub use stream::{
    PinOp, PinRecord, PropMapping, ReturnType, Statement, TxOp, WirePayload, WirePid, WireRef,
    WireStream, WireValue, MAX_SEGMENT_SIZE,
};
