//! Client driver for the PinDB object store.
//!
//! Presents the store's schema-less PINs as native in-memory objects,
//! translates every local mutation into the minimal set of wire operations
//! needed to replicate it remotely, and batches/streams those operations
//! over HTTP, including long-running multi-statement transactions.
//!
//! # Key Types
//!
//! - [`Connection`] — Session facade: transport + transaction context
//! - [`Pin`] — The property-map object model
//! - [`CollectionHandle`] — Ordered collection mutations as element-id diffs
//! - [`TxContext`] — Segment accumulation, nesting, reconciliation
//! - [`StoreTransport`] — The transport seam; [`HttpTransport`] over HTTP,
//!   [`MemoryStore`] fully in memory

pub mod collection;
pub mod connection;
pub mod error;
pub mod memory;
pub mod pin;
pub mod registry;
pub mod transport;
pub mod tx;

pub use collection::{CollectionHandle, Elements};
pub use connection::Connection;
pub use error::{ClientError, ClientResult};
pub use memory::MemoryStore;
pub use pin::{Pin, PropValue};
pub use registry::{
    clear_default, current, push_current, set_default, share, ConnectionScope, SharedConnection,
};
pub use transport::{
    HttpOptions, HttpTransport, SegmentStream, StoreTransport, TransportError, TransportResult,
};
pub use tx::{TxContext, TxOptions};

// Re-export the foundation types
pub use pindb_types::{OpCode, Pid, PinRef, Value, ValueMeta, WireType};
