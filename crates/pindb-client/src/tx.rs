//! Transaction context: accumulates wire segments, manages nested
//! transaction depth, and reconciles store-assigned identifiers back into
//! in-memory PINs.
//!
//! The context is a state machine over {Idle, Open(depth > 0)}. Mutations
//! recorded while a transaction is open (and immediate mode is off) are
//! deferred and serialized at flush/termination time, so a whole
//! transaction travels as one message. When nesting returns to zero the
//! context terminates: pending updates flush, the long-poll exchange ends,
//! and the property dictionary is cleared.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use pindb_proto::{
    PinOp, PinRecord, PropMapping, PropertyDictionary, ReadContext, ReturnType, SegmentCodec,
    Statement, TxOp, WireStream,
};
use pindb_types::Pid;

use crate::error::{ClientError, ClientResult};
use crate::pin::Pin;
use crate::transport::{SegmentStream, StoreTransport};

/// Context behavior flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxOptions {
    /// Do not parse round-trip output (no reconciliation).
    pub ignore_output: bool,
    /// Send every mutation right away instead of deferring inside an open
    /// transaction.
    pub immediate_updates: bool,
}

/// Accumulates wire segments for one session and drives round trips.
pub struct TxContext {
    transport: Arc<dyn StoreTransport>,
    options: TxOptions,
    /// The segment being built.
    stream: WireStream,
    /// Framed segments awaiting the next push.
    segments: Vec<Bytes>,
    expect_output: bool,
    dict: PropertyDictionary,
    depth: u32,
    /// Updates recorded while a transaction is open.
    pending_updates: Vec<Pin>,
    /// PINs serialized into the pending message, in record order.
    request_pins: Vec<Pin>,
    /// Request PINs reconciled against the last response.
    last_request_count: usize,
    last_rc: Option<u32>,
    output: Option<WireStream>,
    long_poll: Option<Box<dyn SegmentStream>>,
    next_cid: u64,
}

impl TxContext {
    pub fn new(transport: Arc<dyn StoreTransport>) -> Self {
        Self::with_options(transport, TxOptions::default())
    }

    pub fn with_options(transport: Arc<dyn StoreTransport>, options: TxOptions) -> Self {
        Self {
            transport,
            options,
            stream: WireStream::default(),
            segments: Vec::new(),
            expect_output: false,
            dict: PropertyDictionary::new(),
            depth: 0,
            pending_updates: Vec::new(),
            request_pins: Vec::new(),
            last_request_count: 0,
            last_rc: None,
            output: None,
            long_poll: None,
            next_cid: 1,
        }
    }

    /// Current transaction nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether a transaction is open.
    pub fn is_open(&self) -> bool {
        self.depth > 0
    }

    /// Return code of the last round trip; unset after a transport failure.
    pub fn last_rc(&self) -> Option<u32> {
        self.last_rc
    }

    /// Parsed output of the last round trip, if any was expected.
    pub fn output(&self) -> Option<&WireStream> {
        self.output.as_ref()
    }

    pub fn take_output(&mut self) -> Option<WireStream> {
        self.output.take()
    }

    pub fn immediate_updates(&self) -> bool {
        self.options.immediate_updates
    }

    // ---- Segment accumulation ----

    /// Serialize the segment being built and start a fresh one. Capturing
    /// an empty segment is a no-op.
    pub fn capture(&mut self) -> ClientResult<()> {
        if self.stream.is_empty() {
            warn!("captured an empty stream segment; ignored");
            return Ok(());
        }
        self.expect_output |= self.stream.expects_output();
        let segment = SegmentCodec::encode(&self.stream)?;
        self.segments.push(segment);
        let bytes: usize = self.segments.iter().map(|s| s.len()).sum();
        debug!(segments = self.segments.len(), bytes, "captured segment");
        self.stream = WireStream::default();
        Ok(())
    }

    /// Append an explicit flush marker, capture, apply deferred updates,
    /// and push everything as one message.
    pub async fn flush(&mut self) -> ClientResult<()> {
        self.flush_inner(true).await
    }

    pub(crate) async fn flush_inner(&mut self, explicit: bool) -> ClientResult<()> {
        if explicit {
            self.stream.flush.push(0);
        }
        self.capture()?;
        self.apply_pending_updates()?;
        self.push_data().await
    }

    // ---- Transaction control ----

    pub async fn start_tx(&mut self) -> ClientResult<()> {
        debug!(depth = self.depth, "start transaction");
        if self.long_poll.is_none() {
            self.long_poll = Some(self.transport.open_stream().await?);
        }
        self.stream.tx_ops.push(TxOp::Start);
        self.capture()?;
        self.depth += 1;
        Ok(())
    }

    pub async fn commit_tx(&mut self) -> ClientResult<()> {
        debug!(depth = self.depth, "commit transaction");
        if self.depth == 0 {
            return Err(ClientError::InvalidArgument("no open transaction".into()));
        }
        self.stream.tx_ops.push(TxOp::Commit);
        self.capture()?;
        self.depth -= 1;
        if self.depth == 0 {
            self.terminate().await?;
        }
        Ok(())
    }

    pub async fn rollback_tx(&mut self) -> ClientResult<()> {
        debug!(depth = self.depth, "rollback transaction");
        if self.depth == 0 {
            return Err(ClientError::InvalidArgument("no open transaction".into()));
        }
        self.stream.tx_ops.push(TxOp::Rollback);
        self.capture()?;
        self.depth -= 1;
        if self.depth == 0 {
            // Updates deferred inside the aborted transaction would
            // otherwise be serialized after the rollback marker and applied
            // outside it.
            if !self.pending_updates.is_empty() {
                warn!(
                    dropped = self.pending_updates.len(),
                    "discarding deferred updates from rolled-back transaction"
                );
                self.pending_updates.clear();
            }
            self.terminate().await?;
        }
        Ok(())
    }

    /// Flush everything pending, end the long-poll exchange, and reset to
    /// Idle. Deferred updates are applied here only; on failure they are
    /// discarded — store state for the batch is undefined and the error
    /// surfaces to the caller.
    pub(crate) async fn terminate(&mut self) -> ClientResult<()> {
        debug!("terminating transaction context");
        if self.depth > 0 {
            warn!(depth = self.depth, "terminating with transactions still open");
        }
        let result = match self.apply_pending_updates() {
            Ok(()) => self.push_data().await,
            Err(e) => Err(e),
        };
        if let Some(mut long_poll) = self.long_poll.take() {
            if let Err(e) = long_poll.finish().await {
                warn!(error = %e, "long-poll teardown failed");
            }
        }
        self.dict.clear();
        self.depth = 0;
        self.pending_updates.clear();
        self.request_pins.clear();
        self.stream = WireStream::default();
        self.segments.clear();
        self.expect_output = false;
        result
    }

    // ---- PIN serialization ----

    /// Serialize PINs into the segment buffer: dictionary updates for any
    /// property names not yet interned go out in their own segment ahead of
    /// the mutation batch.
    pub(crate) fn serialize_pins(&mut self, pins: &[Pin]) -> ClientResult<()> {
        if pins.is_empty() {
            return Err(ClientError::InvalidArgument("no PINs to serialize".into()));
        }
        let known = self.dict.len();
        for pin in pins {
            for name in pin.referenced_property_names() {
                let (id, fresh) = self.dict.intern(&name);
                if fresh {
                    self.stream.properties.push(PropMapping { id, name });
                }
            }
        }
        if self.dict.len() > known {
            self.capture()?;
        }
        for pin in pins {
            let record = pin.build_record(&self.dict)?;
            self.stream.pins.push(record);
            self.request_pins.push(pin.clone());
        }
        self.capture()
    }

    /// Serialize and flush PINs in one round trip, reconciling identifiers
    /// and element ids from the response. Transport failure surfaces as an
    /// error from this call.
    pub async fn save_pins(&mut self, pins: &[Pin]) -> ClientResult<()> {
        if pins.is_empty() {
            return Ok(());
        }
        for pin in pins {
            debug!(pin = ?pin.pid(), "saving");
        }
        self.serialize_pins(pins)?;
        self.flush_inner(true).await
    }

    /// Queue whole-PIN deletions and push them.
    pub async fn delete_pins(&mut self, pids: &[Pid]) -> ClientResult<()> {
        for pid in pids {
            self.stream.pins.push(PinRecord {
                op: PinOp::Delete,
                id: Some((*pid).into()),
                values: vec![],
                rtt: ReturnType::Pids,
                n_values: 0,
            });
        }
        self.flush_inner(false).await
    }

    // ---- Deferred updates ----

    /// Route one update payload: deferred while a transaction is open and
    /// immediate mode is off, sent right away otherwise.
    pub(crate) async fn handle_update(&mut self, update: Pin) -> ClientResult<()> {
        if !self.options.immediate_updates && self.depth > 0 {
            self.record_update(update)
        } else {
            self.save_pins(&[update]).await
        }
    }

    pub(crate) fn record_update(&mut self, update: Pin) -> ClientResult<()> {
        if self.options.immediate_updates {
            return Err(ClientError::InvalidArgument(
                "immediate mode records no deferred updates".into(),
            ));
        }
        debug!(pending = self.pending_updates.len() + 1, "recorded deferred update");
        self.pending_updates.push(update);
        Ok(())
    }

    fn apply_pending_updates(&mut self) -> ClientResult<()> {
        if self.pending_updates.is_empty() {
            return Ok(());
        }
        debug!(count = self.pending_updates.len(), "applying deferred updates");
        let updates = std::mem::take(&mut self.pending_updates);
        self.serialize_pins(&updates)
    }

    // ---- Statements ----

    /// Submit opaque query text through the stream and return the records
    /// it produced (mutation results flushed by the same message are
    /// reconciled and excluded).
    pub async fn query(
        &mut self,
        text: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> ClientResult<WireStream> {
        info!(query = text, "statement via stream");
        let cid = self.next_cid;
        self.next_cid += 1;
        self.stream.stmts.push(Statement {
            text: text.to_string(),
            cid,
            rtt: ReturnType::Pins,
            limit,
            offset,
        });
        self.flush_inner(true).await?;
        let mut output = self.take_output().ok_or_else(|| {
            ClientError::Protocol(pindb_proto::ProtocolError::Deserialization(
                "statement round trip produced no output".into(),
            ))
        })?;
        let skip = self.last_request_count.min(output.pins.len());
        output.pins.drain(..skip);
        Ok(output)
    }

    // ---- Push and reconcile ----

    /// Concatenate all accumulated segments into one message, send it, and
    /// reconcile the parsed response. On transport failure the last return
    /// code stays unset and no partial application is assumed.
    pub(crate) async fn push_data(&mut self) -> ClientResult<()> {
        let expect_output = self.expect_output;
        let request_pins = std::mem::take(&mut self.request_pins);
        self.last_request_count = request_pins.len();
        if self.depth == 0 {
            self.dict.clear();
        }
        let segments = std::mem::take(&mut self.segments);
        self.expect_output = false;
        self.last_rc = None;
        self.output = None;
        if segments.is_empty() {
            debug!("no message to send");
            return Ok(());
        }
        let mut message = BytesMut::new();
        for segment in &segments {
            message.extend_from_slice(segment);
        }
        let message = message.freeze();
        debug!(
            segments = segments.len(),
            bytes = message.len(),
            expect_output,
            "pushing message"
        );
        let raw = if let Some(long_poll) = self.long_poll.as_mut() {
            long_poll.send(message).await?;
            if expect_output {
                Some(long_poll.recv_chunk().await?)
            } else {
                None
            }
        } else {
            let body = self.transport.post(message).await?;
            expect_output.then_some(body)
        };
        self.last_rc = Some(0);
        if let Some(raw) = raw {
            let response = SegmentCodec::decode_response(&raw)?;
            debug!(records = response.pins.len(), "parsed response stream");
            self.reconcile(&request_pins, &response);
            self.output = Some(response);
        }
        Ok(())
    }

    /// Match response records positionally to the request PINs, redirecting
    /// through update payloads; assign identifiers and back-fill element
    /// ids. Mismatches are diagnostics, processing continues best-effort.
    fn reconcile(&self, request_pins: &[Pin], response: &WireStream) {
        if request_pins.is_empty() || self.options.ignore_output {
            return;
        }
        if response.pins.len() < request_pins.len() {
            warn!(
                requested = request_pins.len(),
                returned = response.pins.len(),
                "response contained fewer PIN records than the request"
            );
        }
        let read_ctx = ReadContext::new(response);
        for (record, pin) in response.pins.iter().zip(request_pins) {
            let target = pin.resolve_target();
            if let Some(wire_pid) = record.id {
                let pid = Pid::from(wire_pid);
                if let Err(existing) = target.apply_saved_pid(pid) {
                    warn!(%existing, received = %pid, "identifier conflict on reconciliation; skipping record");
                    continue;
                }
            }
            target.fill_element_ids(&read_ctx, &record.values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use pindb_types::Value;

    use crate::memory::MemoryStore;
    use crate::pin::PropValue;
    use crate::transport::{TransportError, TransportResult};

    fn ctx_with_store() -> (MemoryStore, TxContext) {
        let store = MemoryStore::new();
        let ctx = TxContext::new(Arc::new(store.clone()));
        (store, ctx)
    }

    #[tokio::test]
    async fn transaction_batches_into_one_message() {
        let (store, mut ctx) = ctx_with_store();
        let pin = Pin::with([("a", PropValue::from(1)), ("b", PropValue::from(2))]);
        pin.save(&mut ctx).await.unwrap();
        let before = store.message_count();

        ctx.start_tx().await.unwrap();
        pin.set(&mut ctx, "a", 10).await.unwrap();
        pin.set(&mut ctx, "b", 20).await.unwrap();
        assert_eq!(store.message_count(), before, "mutations leaked before commit");
        ctx.commit_tx().await.unwrap();
        assert_eq!(store.message_count(), before + 1, "commit must push exactly one message");

        pin.reload(&mut ctx).await.unwrap();
        assert_eq!(pin.value("a"), Some(Value::from(10)));
        assert_eq!(pin.value("b"), Some(Value::from(20)));
    }

    #[tokio::test]
    async fn immediate_mode_sends_right_away() {
        let store = MemoryStore::new();
        let mut ctx = TxContext::with_options(
            Arc::new(store.clone()),
            TxOptions { immediate_updates: true, ..TxOptions::default() },
        );
        let pin = Pin::with([("a", PropValue::from(1))]);
        pin.save(&mut ctx).await.unwrap();
        let before = store.message_count();

        ctx.start_tx().await.unwrap();
        pin.set(&mut ctx, "a", 2).await.unwrap();
        assert_eq!(store.message_count(), before + 1);
        ctx.commit_tx().await.unwrap();
    }

    #[tokio::test]
    async fn mutations_outside_transactions_send_right_away() {
        let (store, mut ctx) = ctx_with_store();
        let pin = Pin::with([("a", PropValue::from(1))]);
        pin.save(&mut ctx).await.unwrap();
        let before = store.message_count();
        pin.set(&mut ctx, "a", 2).await.unwrap();
        assert_eq!(store.message_count(), before + 1);
    }

    #[tokio::test]
    async fn nested_transactions_terminate_at_depth_zero() {
        let (store, mut ctx) = ctx_with_store();
        let pin = Pin::with([("a", PropValue::from(1))]);
        pin.save(&mut ctx).await.unwrap();
        let before = store.message_count();

        ctx.start_tx().await.unwrap();
        ctx.start_tx().await.unwrap();
        pin.set(&mut ctx, "a", 2).await.unwrap();
        ctx.commit_tx().await.unwrap();
        assert!(ctx.is_open());
        assert_eq!(store.message_count(), before, "inner commit must not push");
        ctx.commit_tx().await.unwrap();
        assert!(!ctx.is_open());
        assert_eq!(store.message_count(), before + 1);
    }

    #[tokio::test]
    async fn commit_without_transaction_fails() {
        let (_store, mut ctx) = ctx_with_store();
        assert!(matches!(ctx.commit_tx().await, Err(ClientError::InvalidArgument(_))));
        assert!(matches!(ctx.rollback_tx().await, Err(ClientError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn rollback_discards_batched_mutations() {
        let (_store, mut ctx) = ctx_with_store();
        let pin = Pin::with([("a", PropValue::from(1))]);
        pin.save(&mut ctx).await.unwrap();

        ctx.start_tx().await.unwrap();
        pin.set(&mut ctx, "a", 99).await.unwrap();
        ctx.rollback_tx().await.unwrap();

        pin.reload(&mut ctx).await.unwrap();
        assert_eq!(pin.value("a"), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn capture_of_empty_stream_is_a_no_op() {
        let (_store, mut ctx) = ctx_with_store();
        ctx.capture().unwrap();
        assert!(ctx.segments.is_empty());
    }

    #[tokio::test]
    async fn property_dictionary_resets_between_transactions() {
        let (_store, mut ctx) = ctx_with_store();
        let first = Pin::with([("alpha", PropValue::from(1))]);
        first.save(&mut ctx).await.unwrap();
        assert_eq!(ctx.dict.len(), 0, "dictionary must clear once idle");

        let second = Pin::with([("beta", PropValue::from(2))]);
        second.save(&mut ctx).await.unwrap();

        // Both survive with their own property names despite the driver
        // reusing the same private id space.
        let alpha = ctx.query("SELECT * WHERE EXISTS(alpha);", None, None).await.unwrap();
        let beta = ctx.query("SELECT * WHERE EXISTS(beta);", None, None).await.unwrap();
        assert_eq!(alpha.pins.len(), 1);
        assert_eq!(beta.pins.len(), 1);
    }

    #[tokio::test]
    async fn query_returns_only_statement_records() {
        let (_store, mut ctx) = ctx_with_store();
        let pin = Pin::with([("name", PropValue::from("Roger"))]);
        pin.save(&mut ctx).await.unwrap();

        ctx.start_tx().await.unwrap();
        pin.set(&mut ctx, "name", "Rachel").await.unwrap();
        // The statement flushes the deferred update in the same message;
        // only the query's own records come back.
        let result = ctx.query("SELECT * WHERE EXISTS(name);", None, None).await.unwrap();
        assert_eq!(result.pins.len(), 1);
        ctx.commit_tx().await.unwrap();

        pin.reload(&mut ctx).await.unwrap();
        assert_eq!(pin.value("name"), Some(Value::from("Rachel")));
    }

    #[tokio::test]
    async fn query_respects_limit_and_offset() {
        let (_store, mut ctx) = ctx_with_store();
        for i in 0..5 {
            Pin::with([("n", PropValue::from(i))]).save(&mut ctx).await.unwrap();
        }
        let page = ctx
            .query("SELECT * WHERE EXISTS(n);", Some(2), Some(1))
            .await
            .unwrap();
        assert_eq!(page.pins.len(), 2);
    }

    struct FailingTransport;

    #[async_trait]
    impl StoreTransport for FailingTransport {
        async fn get(&self, _path_query: &str) -> TransportResult<bytes::Bytes> {
            Err(TransportError::NotOpen)
        }

        async fn post(&self, _body: bytes::Bytes) -> TransportResult<bytes::Bytes> {
            Err(TransportError::NotOpen)
        }

        async fn open_stream(&self) -> TransportResult<Box<dyn SegmentStream>> {
            Err(TransportError::NotOpen)
        }
    }

    #[tokio::test]
    async fn transport_failure_surfaces_and_leaves_status_unset() {
        let mut ctx = TxContext::new(Arc::new(FailingTransport));
        let pin = Pin::with([("a", PropValue::from(1))]);
        let result = pin.save(&mut ctx).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert!(ctx.last_rc().is_none());
        assert!(ctx.output().is_none());
        assert!(pin.pid().is_none());
    }

    #[tokio::test]
    async fn failed_commit_discards_deferred_updates() {
        // A store that accepts the open but fails the push.
        struct OpenThenFail;
        struct FailingStream;

        #[async_trait]
        impl SegmentStream for FailingStream {
            async fn send(&mut self, _message: bytes::Bytes) -> TransportResult<()> {
                Err(TransportError::Closed)
            }
            async fn recv_chunk(&mut self) -> TransportResult<bytes::Bytes> {
                Err(TransportError::Closed)
            }
            async fn finish(&mut self) -> TransportResult<()> {
                Ok(())
            }
        }

        #[async_trait]
        impl StoreTransport for OpenThenFail {
            async fn get(&self, _path_query: &str) -> TransportResult<bytes::Bytes> {
                Err(TransportError::NotOpen)
            }
            async fn post(&self, _body: bytes::Bytes) -> TransportResult<bytes::Bytes> {
                Err(TransportError::NotOpen)
            }
            async fn open_stream(&self) -> TransportResult<Box<dyn SegmentStream>> {
                Ok(Box::new(FailingStream))
            }
        }

        let mut ctx = TxContext::new(Arc::new(OpenThenFail));
        let pin = Pin::new();
        pin.apply_saved_pid(Pid::local(7)).unwrap();

        ctx.start_tx().await.unwrap();
        pin.set(&mut ctx, "a", 1).await.unwrap();
        let result = ctx.commit_tx().await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        // The context is back to Idle with nothing pending.
        assert!(!ctx.is_open());
        assert!(ctx.pending_updates.is_empty());
        assert!(ctx.segments.is_empty());
    }
}
