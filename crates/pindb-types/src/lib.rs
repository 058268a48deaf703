//! Foundation types for the PinDB client driver.
//!
//! This crate provides the identifier, value, and metadata types shared by
//! every other PinDB crate. Nothing here performs I/O.
//!
//! # Key Types
//!
//! - [`Pid`] — Globally unique, store-assigned identifier of a PIN
//! - [`PinRef`] — Reference to a PIN, one of its properties, or one element
//!   of an ordered collection property
//! - [`Value`] — Closed sum of the native value kinds the wire can carry
//! - [`ValueMeta`] — Per-value wire metadata (type tag, operation, element id)
//! - [`WireType`] / [`OpCode`] — The store's value type tags and mutation ops

pub mod error;
pub mod meta;
pub mod pid;
pub mod props;
pub mod reference;
pub mod value;

pub use error::TypeError;
pub use meta::{
    OpCode, ValueMeta, WireType, EID_COLLECTION, EID_FIRST_ELEMENT, EID_LAST_ELEMENT,
};
pub use pid::Pid;
pub use props::{well_known, FIRST_APP_PROP_ID};
pub use reference::PinRef;
pub use value::{from_store_micros, to_store_micros, Value, STORE_EPOCH_OFFSET_MICROS};
