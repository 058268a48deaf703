//! Session facade: owns one transport connection and its lazily-created
//! transaction context.

use std::sync::Arc;

use tracing::warn;

use pindb_proto::{ProtocolError, SegmentCodec, WireStream};

use crate::error::ClientResult;
use crate::pin::Pin;
use crate::transport::{query_path, HttpOptions, HttpTransport, StoreTransport};
use crate::tx::{TxContext, TxOptions};

/// One session against a PinDB store.
///
/// Queries issued while a transaction is open participate in the streaming
/// exchange; outside of one they travel as plain GETs.
pub struct Connection {
    transport: Arc<dyn StoreTransport>,
    options: TxOptions,
    ctx: Option<TxContext>,
}

impl Connection {
    pub fn new(transport: Arc<dyn StoreTransport>) -> Self {
        Self::with_options(transport, TxOptions::default())
    }

    pub fn with_options(transport: Arc<dyn StoreTransport>, options: TxOptions) -> Self {
        Self { transport, options, ctx: None }
    }

    /// Connect over HTTP with keep-alive.
    pub fn open_http(options: HttpOptions) -> ClientResult<Self> {
        let transport = HttpTransport::new(options)?;
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn transport(&self) -> Arc<dyn StoreTransport> {
        self.transport.clone()
    }

    /// The session's transaction context, created on first use.
    pub fn ctx(&mut self) -> &mut TxContext {
        if self.ctx.is_none() {
            self.ctx = Some(TxContext::with_options(self.transport.clone(), self.options));
        }
        self.ctx.as_mut().expect("context just created")
    }

    pub async fn start_tx(&mut self) -> ClientResult<()> {
        self.ctx().start_tx().await
    }

    pub async fn commit_tx(&mut self) -> ClientResult<()> {
        self.ctx().commit_tx().await
    }

    pub async fn rollback_tx(&mut self) -> ClientResult<()> {
        self.ctx().rollback_tx().await
    }

    /// Save a batch of PIN descriptions in one round trip.
    pub async fn create_pins(&mut self, pins: Vec<Pin>) -> ClientResult<Vec<Pin>> {
        Pin::save_all(self.ctx(), &pins).await?;
        Ok(pins)
    }

    /// Submit query text, returning the raw response stream
    /// (binary-protocol encoding).
    pub async fn query_stream(
        &mut self,
        q: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> ClientResult<WireStream> {
        if self.ctx.as_ref().is_some_and(TxContext::is_open) {
            return self.ctx().query(q, limit, offset).await;
        }
        let path = query_path(q, "proto", false, limit, offset);
        let body = self.transport.get(&path).await?;
        Ok(SegmentCodec::decode_response(&body)?)
    }

    /// Submit query text and materialize the resulting PINs
    /// (structured-records encoding).
    pub async fn query_pins(
        &mut self,
        q: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> ClientResult<Vec<Pin>> {
        let stream = self.query_stream(q, limit, offset).await?;
        Ok(Pin::load_pins(&stream))
    }

    /// Submit query text in raw-count mode.
    pub async fn query_count(&self, q: &str) -> ClientResult<u64> {
        let path = query_path(q, "json", true, None, None);
        let body = self.transport.get(&path).await?;
        let text = std::str::from_utf8(&body)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?
            .trim();
        if text.is_empty() {
            return Ok(0);
        }
        text.parse().map_err(|_| {
            ProtocolError::Deserialization(format!("count response was not numeric: {text:?}")).into()
        })
    }

    /// Terminate the session: flush anything pending and end the streaming
    /// exchange.
    pub async fn close(mut self) -> ClientResult<()> {
        if let Some(mut ctx) = self.ctx.take() {
            if ctx.is_open() {
                warn!("closing connection with an open transaction");
            }
            ctx.terminate().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pindb_types::Value;

    use crate::memory::MemoryStore;
    use crate::pin::PropValue;

    fn connection() -> (MemoryStore, Connection) {
        let store = MemoryStore::new();
        let conn = Connection::new(Arc::new(store.clone()));
        (store, conn)
    }

    #[tokio::test]
    async fn create_and_query_pins() {
        let (_store, mut conn) = connection();
        let created = conn
            .create_pins(vec![
                Pin::with([("name", PropValue::from("Roger")), ("age", PropValue::from(40))]),
                Pin::with([("name", PropValue::from("Rachel"))]),
            ])
            .await
            .unwrap();
        assert!(created.iter().all(|p| p.pid().is_some()));

        let found = conn.query_pins("SELECT * WHERE EXISTS(name);", None, None).await.unwrap();
        assert_eq!(found.len(), 2);
        let names: Vec<_> = found.iter().filter_map(|p| p.value("name")).collect();
        assert!(names.contains(&Value::from("Roger")));
        assert!(names.contains(&Value::from("Rachel")));
    }

    #[tokio::test]
    async fn query_count_mode() {
        let (_store, mut conn) = connection();
        conn.create_pins(vec![Pin::with([("x", PropValue::from(1))])]).await.unwrap();
        conn.create_pins(vec![Pin::with([("x", PropValue::from(2))])]).await.unwrap();
        assert_eq!(conn.query_count("SELECT * WHERE EXISTS(x);").await.unwrap(), 2);
        assert_eq!(conn.query_count("SELECT * WHERE EXISTS(nothing);").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transaction_surface_delegates_to_context() {
        let (store, mut conn) = connection();
        let pin = Pin::with([("a", PropValue::from(1))]);
        conn.create_pins(vec![pin.clone()]).await.unwrap();
        let before = store.message_count();

        conn.start_tx().await.unwrap();
        pin.set(conn.ctx(), "a", 2).await.unwrap();
        conn.commit_tx().await.unwrap();
        assert_eq!(store.message_count(), before + 1);
    }

    #[tokio::test]
    async fn in_transaction_queries_use_the_stream() {
        let (store, mut conn) = connection();
        let pin = Pin::with([("a", PropValue::from(1))]);
        conn.create_pins(vec![pin.clone()]).await.unwrap();

        conn.start_tx().await.unwrap();
        let messages_before = store.message_count();
        let found = conn.query_pins("SELECT * WHERE EXISTS(a);", None, None).await.unwrap();
        assert_eq!(found.len(), 1);
        // The query traveled through the streaming exchange, not a GET.
        assert_eq!(store.message_count(), messages_before + 1);
        conn.commit_tx().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_clean_without_activity() {
        let (_store, conn) = connection();
        conn.close().await.unwrap();
    }
}
