//! In-memory store, implementing [`StoreTransport`] without a network.
//!
//! `MemoryStore` executes the driver's wire messages the way the real store
//! does at the protocol level: it applies dictionary segments (remapping the
//! driver's message-scoped property ids onto its own global ids), executes
//! PIN mutation records addressed by element id, assigns identifiers and
//! element ids, honors transaction markers with snapshot semantics, and
//! answers the statement forms the driver itself generates
//! (`... FROM @pid`, `... WHERE EXISTS(prop)`). Useful for offline tests of
//! everything above the transport seam.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use pindb_proto::{
    PinOp, PinRecord, PropMapping, ReturnType, SegmentCodec, TxOp, WirePayload, WirePid,
    WireStream, WireValue,
};
use pindb_types::{
    OpCode, Pid, WireType, EID_COLLECTION, EID_FIRST_ELEMENT, EID_LAST_ELEMENT,
    FIRST_APP_PROP_ID,
};

use crate::transport::{
    percent_decode, SegmentStream, StoreTransport, TransportError, TransportResult,
};

/// First property id of the store's own id space. Driver-assigned message
/// ids live below this and are remapped on arrival.
const FIRST_STORE_PROP_ID: u32 = 0x1000;

#[derive(Clone)]
enum StoredProp {
    Scalar(WireValue),
    Coll(Vec<WireValue>),
}

#[derive(Clone, Default)]
struct StoredPin {
    props: BTreeMap<u32, StoredProp>,
}

/// Transactional state: only PIN contents roll back. Identifiers, element
/// ids, and the property dictionary are never reused or reverted.
#[derive(Clone, Default)]
struct StoreState {
    pins: BTreeMap<u64, StoredPin>,
}

struct MemoryInner {
    state: StoreState,
    tx_stack: Vec<StoreState>,
    next_pid: u64,
    next_eid: u32,
    next_prop: u32,
    /// Store id → property name.
    names: BTreeMap<u32, String>,
    /// Property name → store id.
    ids: HashMap<String, u32>,
    /// Driver's message-scoped id → store id.
    client_ids: HashMap<u32, u32>,
    messages: usize,
    op_log: Vec<WireValue>,
}

impl Default for MemoryInner {
    fn default() -> Self {
        Self {
            state: StoreState::default(),
            tx_stack: Vec::new(),
            next_pid: 0x50001,
            next_eid: 1,
            next_prop: FIRST_STORE_PROP_ID,
            names: BTreeMap::new(),
            ids: HashMap::new(),
            client_ids: HashMap::new(),
            messages: 0,
            op_log: Vec::new(),
        }
    }
}

/// In-memory PinDB store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of PINs currently held.
    pub fn pin_count(&self) -> usize {
        self.lock().state.pins.len()
    }

    /// Whether the store holds the given PIN.
    pub fn contains(&self, pid: Pid) -> bool {
        self.lock().state.pins.contains_key(&pid.local_id())
    }

    /// Number of binary messages received so far.
    pub fn message_count(&self) -> usize {
        self.lock().messages
    }

    /// Every mutation value applied so far, in arrival order.
    pub fn op_log(&self) -> Vec<WireValue> {
        self.lock().op_log.clone()
    }

    pub fn clear_op_log(&self) {
        self.lock().op_log.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    fn execute_message(&self, data: &[u8]) -> TransportResult<Bytes> {
        let segments = SegmentCodec::decode_message(data)
            .map_err(|e| TransportError::Http(format!("store rejected message: {e}")))?;
        let mut inner = self.lock();
        inner.messages += 1;
        let mut mutation_results = Vec::new();
        let mut statement_results = Vec::new();
        for segment in segments {
            for mapping in &segment.properties {
                inner.map_property(mapping);
            }
            for tx_op in &segment.tx_ops {
                inner.apply_tx_op(*tx_op);
            }
            for record in &segment.pins {
                if let Some(result) = inner.apply_record(record) {
                    mutation_results.push(result);
                }
            }
            for stmt in &segment.stmts {
                statement_results.extend(inner.run_statement(&stmt.text, stmt.limit, stmt.offset));
            }
        }
        let mut response = WireStream { properties: inner.dictionary(), ..WireStream::default() };
        response.pins = mutation_results;
        response.pins.extend(statement_results);
        drop(inner);
        SegmentCodec::encode(&response).map_err(|e| TransportError::Http(e.to_string()))
    }

    fn execute_get(&self, path_query: &str) -> TransportResult<Bytes> {
        let query_string = path_query.splitn(2, '?').nth(1).unwrap_or("");
        let mut q = String::new();
        let mut count = false;
        let mut limit = None;
        let mut offset = None;
        for pair in query_string.split('&') {
            let mut kv = pair.splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some("q"), Some(v)) => q = percent_decode(v),
                (Some("type"), Some("count")) => count = true,
                (Some("limit"), Some(v)) => limit = v.parse().ok(),
                (Some("offset"), Some(v)) => offset = v.parse().ok(),
                _ => {}
            }
        }
        let inner = self.lock();
        if count {
            let n = inner.matching_pins(&q).len();
            return Ok(Bytes::from(n.to_string()));
        }
        let response = WireStream {
            properties: inner.dictionary(),
            pins: inner.run_statement(&q, limit, offset),
            ..WireStream::default()
        };
        drop(inner);
        SegmentCodec::encode(&response).map_err(|e| TransportError::Http(e.to_string()))
    }
}

impl MemoryInner {
    fn dictionary(&self) -> Vec<PropMapping> {
        self.names
            .iter()
            .map(|(id, name)| PropMapping { id: *id, name: name.clone() })
            .collect()
    }

    fn map_property(&mut self, mapping: &PropMapping) {
        let store_id = match self.ids.get(&mapping.name) {
            Some(id) => *id,
            None => {
                let id = self.next_prop;
                self.next_prop += 1;
                self.ids.insert(mapping.name.clone(), id);
                self.names.insert(id, mapping.name.clone());
                id
            }
        };
        self.client_ids.insert(mapping.id, store_id);
    }

    fn translate_prop(&self, id: u32) -> u32 {
        if let Some(store_id) = self.client_ids.get(&id) {
            return *store_id;
        }
        // Well-known ids and store ids obtained from prior reads pass
        // through untranslated.
        if id < FIRST_APP_PROP_ID || self.names.contains_key(&id) {
            return id;
        }
        warn!(id, "property id with no dictionary mapping");
        id
    }

    fn translate_value(&self, v: &mut WireValue) {
        v.prop = self.translate_prop(v.prop);
        match &mut v.payload {
            WirePayload::Ref(r) => r.prop = self.translate_prop(r.prop),
            WirePayload::PropId(id) => *id = self.translate_prop(*id),
            WirePayload::Array(elements) => {
                for element in elements.iter_mut() {
                    self.translate_value(element);
                }
            }
            _ => {}
        }
    }

    fn apply_tx_op(&mut self, op: TxOp) {
        match op {
            TxOp::Start => {
                let snapshot = self.state.clone();
                self.tx_stack.push(snapshot);
            }
            TxOp::Commit => {
                self.tx_stack.pop();
            }
            TxOp::Rollback => {
                if let Some(snapshot) = self.tx_stack.pop() {
                    self.state = snapshot;
                }
            }
        }
    }

    fn apply_record(&mut self, record: &PinRecord) -> Option<PinRecord> {
        match record.op {
            PinOp::Insert => Some(self.apply_insert(record)),
            PinOp::Update => Some(self.apply_update(record)),
            PinOp::Delete => {
                if let Some(wire_pid) = record.id {
                    self.state.pins.remove(&wire_pid.id);
                }
                None
            }
        }
    }

    fn apply_insert(&mut self, record: &PinRecord) -> PinRecord {
        let pid = self.next_pid;
        self.next_pid += 1;
        let mut pin = StoredPin::default();
        let mut groups: Vec<(u32, Vec<WireValue>)> = Vec::new();
        for v in &record.values {
            let mut v = v.clone();
            self.translate_value(&mut v);
            self.op_log.push(v.clone());
            match groups.iter_mut().find(|(prop, _)| *prop == v.prop) {
                Some((_, list)) => list.push(v),
                None => groups.push((v.prop, vec![v])),
            }
        }
        for (prop, values) in groups {
            let collection = values.len() > 1 || values.iter().any(|v| v.op.inserts_element());
            if collection {
                let elements = values.iter().map(|v| self.new_element(v)).collect();
                pin.props.insert(prop, StoredProp::Coll(elements));
            } else {
                pin.props.insert(prop, StoredProp::Scalar(normalize_scalar(&values[0])));
            }
        }
        self.state.pins.insert(pid, pin);
        let wire_pid = WirePid { id: pid, ident: 0 };
        match record.rtt {
            ReturnType::Pins => {
                let mut result = full_record(wire_pid, &self.state.pins[&pid]);
                result.op = PinOp::Insert;
                result
            }
            ReturnType::Pids => PinRecord {
                op: PinOp::Insert,
                id: Some(wire_pid),
                values: vec![],
                rtt: ReturnType::Pids,
                n_values: 0,
            },
        }
    }

    fn apply_update(&mut self, record: &PinRecord) -> PinRecord {
        let mut inserted = Vec::new();
        if let Some(wire_pid) = record.id {
            if let Some(mut pin) = self.state.pins.remove(&wire_pid.id) {
                for v in &record.values {
                    let mut v = v.clone();
                    self.translate_value(&mut v);
                    self.op_log.push(v.clone());
                    self.apply_update_value(&mut pin, &v, &mut inserted);
                }
                self.state.pins.insert(wire_pid.id, pin);
            } else {
                warn!(pid = wire_pid.id, "update for unknown PIN");
            }
        } else {
            warn!("update record without an id");
        }
        let values = match record.rtt {
            ReturnType::Pins => inserted,
            ReturnType::Pids => vec![],
        };
        PinRecord {
            op: PinOp::Update,
            id: record.id,
            n_values: values.len() as u32,
            values,
            rtt: record.rtt,
        }
    }

    fn apply_update_value(
        &mut self,
        pin: &mut StoredPin,
        v: &WireValue,
        inserted: &mut Vec<WireValue>,
    ) {
        match v.op {
            OpCode::Set if v.eid == EID_COLLECTION => {
                if let WirePayload::Array(source) = &v.payload {
                    let elements = source.iter().map(|e| self.new_element(e)).collect();
                    pin.props.insert(v.prop, StoredProp::Coll(elements));
                } else {
                    pin.props.insert(v.prop, StoredProp::Scalar(normalize_scalar(v)));
                }
            }
            OpCode::Set => {
                if let Some(StoredProp::Coll(elements)) = pin.props.get_mut(&v.prop) {
                    match elements.iter_mut().find(|e| e.eid == v.eid) {
                        Some(element) => {
                            element.payload = v.payload.clone();
                            element.wtype = v.wtype;
                        }
                        None => warn!(eid = v.eid, "set for unknown element id"),
                    }
                }
            }
            OpCode::Add | OpCode::AddBefore => {
                let element = self.new_element(v);
                let elements = self.coerce_collection(pin, v.prop);
                let position = match (v.op, v.eid) {
                    (OpCode::Add, EID_LAST_ELEMENT | EID_COLLECTION) => elements.len(),
                    (OpCode::Add, anchor) => elements
                        .iter()
                        .position(|e| e.eid == anchor)
                        .map(|p| p + 1)
                        .unwrap_or(elements.len()),
                    (OpCode::AddBefore, EID_FIRST_ELEMENT) => 0,
                    (_, anchor) => elements
                        .iter()
                        .position(|e| e.eid == anchor)
                        .unwrap_or(elements.len()),
                };
                // Echo the request op so the driver can match the result to
                // its placeholder metadata.
                inserted.push(WireValue { op: v.op, ..element.clone() });
                elements.insert(position, element);
            }
            OpCode::Delete if v.eid == EID_COLLECTION => {
                pin.props.remove(&v.prop);
            }
            OpCode::Delete => {
                if let Some(StoredProp::Coll(elements)) = pin.props.get_mut(&v.prop) {
                    elements.retain(|e| e.eid != v.eid);
                }
            }
            OpCode::Move | OpCode::MoveBefore => {
                let anchor = payload_eid(&v.payload);
                if let Some(StoredProp::Coll(elements)) = pin.props.get_mut(&v.prop) {
                    let Some(current) = elements.iter().position(|e| e.eid == v.eid) else {
                        warn!(eid = v.eid, "move for unknown element id");
                        return;
                    };
                    let element = elements.remove(current);
                    let position = if v.op == OpCode::MoveBefore {
                        if anchor == EID_FIRST_ELEMENT {
                            0
                        } else {
                            elements.iter().position(|e| e.eid == anchor).unwrap_or(elements.len())
                        }
                    } else {
                        elements
                            .iter()
                            .position(|e| e.eid == anchor)
                            .map(|p| p + 1)
                            .unwrap_or(elements.len())
                    };
                    elements.insert(position, element);
                }
            }
        }
    }

    fn new_element(&mut self, v: &WireValue) -> WireValue {
        let eid = self.next_eid;
        self.next_eid += 1;
        WireValue {
            prop: v.prop,
            wtype: v.wtype,
            op: OpCode::Set,
            eid,
            flags: v.flags,
            payload: v.payload.clone(),
        }
    }

    fn coerce_collection<'a>(&mut self, pin: &'a mut StoredPin, prop: u32) -> &'a mut Vec<WireValue> {
        if let Some(StoredProp::Scalar(_)) = pin.props.get(&prop) {
            if let Some(StoredProp::Scalar(scalar)) = pin.props.remove(&prop) {
                let element = self.new_element(&scalar);
                pin.props.insert(prop, StoredProp::Coll(vec![element]));
            }
        }
        if !matches!(pin.props.get(&prop), Some(StoredProp::Coll(_))) {
            pin.props.insert(prop, StoredProp::Coll(vec![]));
        }
        match pin.props.get_mut(&prop) {
            Some(StoredProp::Coll(elements)) => elements,
            _ => unreachable!("property was just coerced to a collection"),
        }
    }

    fn run_statement(&self, text: &str, limit: Option<u32>, offset: Option<u32>) -> Vec<PinRecord> {
        let matches = self.matching_pins(text);
        let offset = offset.unwrap_or(0) as usize;
        let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
        matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(pid, pin)| full_record(WirePid { id: pid, ident: 0 }, pin))
            .collect()
    }

    fn matching_pins(&self, text: &str) -> Vec<(u64, &StoredPin)> {
        if let Some(idx) = text.find("FROM @") {
            let hex: String = text[idx + 6..]
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .collect();
            let Ok(pid) = u64::from_str_radix(&hex, 16) else { return vec![] };
            return self.state.pins.get(&pid).map(|pin| vec![(pid, pin)]).unwrap_or_default();
        }
        if let Some(idx) = text.find("EXISTS(") {
            let rest = &text[idx + 7..];
            let Some(end) = rest.find(')') else { return vec![] };
            let Some(prop) = self.ids.get(&rest[..end]).copied() else { return vec![] };
            return self
                .state
                .pins
                .iter()
                .filter(|(_, pin)| pin.props.contains_key(&prop))
                .map(|(pid, pin)| (*pid, pin))
                .collect();
        }
        vec![]
    }
}

fn normalize_scalar(v: &WireValue) -> WireValue {
    WireValue { op: OpCode::Set, eid: EID_COLLECTION, ..v.clone() }
}

fn payload_eid(payload: &WirePayload) -> u32 {
    match payload {
        WirePayload::U32(u) => *u,
        WirePayload::I32(i) => *i as u32,
        WirePayload::I64(i) => *i as u32,
        WirePayload::U64(u) => *u as u32,
        other => {
            warn!(payload = other.kind(), "move anchor is not an integral payload");
            EID_COLLECTION
        }
    }
}

fn full_record(pid: WirePid, pin: &StoredPin) -> PinRecord {
    let values: Vec<WireValue> = pin
        .props
        .iter()
        .map(|(prop, stored)| match stored {
            StoredProp::Scalar(v) => v.clone(),
            StoredProp::Coll(elements) => WireValue {
                prop: *prop,
                wtype: WireType::Array,
                op: OpCode::Set,
                eid: EID_COLLECTION,
                flags: 0,
                payload: WirePayload::Array(elements.clone()),
            },
        })
        .collect();
    PinRecord {
        op: PinOp::Update,
        id: Some(pid),
        n_values: values.len() as u32,
        values,
        rtt: ReturnType::Pins,
    }
}

struct MemorySegmentStream {
    store: MemoryStore,
    pending: Option<Bytes>,
}

#[async_trait]
impl SegmentStream for MemorySegmentStream {
    async fn send(&mut self, message: Bytes) -> TransportResult<()> {
        self.pending = Some(self.store.execute_message(&message)?);
        Ok(())
    }

    async fn recv_chunk(&mut self) -> TransportResult<Bytes> {
        self.pending.take().ok_or(TransportError::Closed)
    }

    async fn finish(&mut self) -> TransportResult<()> {
        self.pending = None;
        Ok(())
    }
}

#[async_trait]
impl StoreTransport for MemoryStore {
    async fn get(&self, path_query: &str) -> TransportResult<Bytes> {
        self.execute_get(path_query)
    }

    async fn post(&self, body: Bytes) -> TransportResult<Bytes> {
        self.execute_message(&body)
    }

    async fn open_stream(&self) -> TransportResult<Box<dyn SegmentStream>> {
        Ok(Box::new(MemorySegmentStream { store: self.clone(), pending: None }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pindb_proto::Statement;

    fn insert_record(values: Vec<WireValue>, rtt: ReturnType) -> PinRecord {
        let n_values = values.len() as u32;
        PinRecord { op: PinOp::Insert, id: None, values, rtt, n_values }
    }

    fn int_value(prop: u32, op: OpCode, eid: u32, i: i32) -> WireValue {
        WireValue { prop, wtype: WireType::Int, op, eid, flags: 0, payload: WirePayload::I32(i) }
    }

    fn send(store: &MemoryStore, stream: WireStream) -> WireStream {
        let message = SegmentCodec::encode(&stream).unwrap();
        let raw = store.execute_message(&message).unwrap();
        SegmentCodec::decode_response(&raw).unwrap()
    }

    fn store_prop_id(response: &WireStream, name: &str) -> u32 {
        response
            .properties
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.id)
            .unwrap_or_else(|| panic!("property {name} not in response dictionary"))
    }

    #[test]
    fn insert_assigns_pid_and_eids() {
        let store = MemoryStore::new();
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "tags".into() });
        stream.pins.push(insert_record(
            vec![
                int_value(0x100, OpCode::Add, EID_LAST_ELEMENT, 1),
                int_value(0x100, OpCode::Add, EID_LAST_ELEMENT, 2),
            ],
            ReturnType::Pins,
        ));
        let response = send(&store, stream);
        assert_eq!(response.pins.len(), 1);
        let record = &response.pins[0];
        assert!(record.id.is_some());
        let WirePayload::Array(elements) = &record.values[0].payload else {
            panic!("expected array response");
        };
        assert_eq!(elements.len(), 2);
        assert_ne!(elements[0].eid, elements[1].eid);
        assert!(elements.iter().all(|e| e.eid < EID_FIRST_ELEMENT));
    }

    #[test]
    fn element_ops_address_by_eid() {
        let store = MemoryStore::new();
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "tags".into() });
        stream.pins.push(insert_record(
            vec![
                int_value(0x100, OpCode::Add, EID_LAST_ELEMENT, 10),
                int_value(0x100, OpCode::Add, EID_LAST_ELEMENT, 20),
            ],
            ReturnType::Pins,
        ));
        let response = send(&store, stream);
        let pid = response.pins[0].id.unwrap();
        let WirePayload::Array(elements) = response.pins[0].values[0].payload.clone() else {
            panic!("expected array");
        };

        // Delete the first element by its eid, then insert before the
        // remaining one. The driver-scoped property id is reused without a
        // new mapping segment.
        let mut stream = WireStream::default();
        stream.pins.push(PinRecord {
            op: PinOp::Update,
            id: Some(pid),
            values: vec![
                int_value(0x100, OpCode::Delete, elements[0].eid, 0),
                int_value(0x100, OpCode::AddBefore, elements[1].eid, 15),
            ],
            rtt: ReturnType::Pins,
            n_values: 2,
        });
        let response = send(&store, stream);
        assert_eq!(response.pins[0].values.len(), 1);
        assert_eq!(response.pins[0].values[0].op, OpCode::AddBefore);

        let mut stream = WireStream::default();
        stream.stmts.push(Statement {
            text: format!("SELECT * FROM @{:x};", pid.id),
            cid: 1,
            rtt: ReturnType::Pins,
            limit: None,
            offset: None,
        });
        let response = send(&store, stream);
        let WirePayload::Array(elements) = &response.pins[0].values[0].payload else {
            panic!("expected array");
        };
        let values: Vec<_> = elements.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(values, vec![WirePayload::I32(15), WirePayload::I32(20)]);
    }

    #[test]
    fn reused_message_ids_remap_to_distinct_properties() {
        let store = MemoryStore::new();
        // First "transaction" maps 0x100 to "a".
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "a".into() });
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 1)],
            ReturnType::Pids,
        ));
        send(&store, stream);
        // Second one reuses 0x100 for "b" after the driver cleared its
        // dictionary.
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "b".into() });
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 2)],
            ReturnType::Pids,
        ));
        send(&store, stream);

        for (name, expected_payload) in [("a", WirePayload::I32(1)), ("b", WirePayload::I32(2))] {
            let mut stream = WireStream::default();
            stream.stmts.push(Statement {
                text: format!("SELECT * WHERE EXISTS({name});"),
                cid: 1,
                rtt: ReturnType::Pins,
                limit: None,
                offset: None,
            });
            let response = send(&store, stream);
            assert_eq!(response.pins.len(), 1, "property {name}");
            let record = &response.pins[0];
            assert_eq!(record.values[0].prop, store_prop_id(&response, name));
            assert_eq!(record.values[0].payload, expected_payload);
        }
    }

    #[test]
    fn rollback_restores_pins_but_not_counters() {
        let store = MemoryStore::new();
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "n".into() });
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 1)],
            ReturnType::Pids,
        ));
        let first = send(&store, stream).pins[0].id.unwrap();

        let mut stream = WireStream::default();
        stream.tx_ops.push(TxOp::Start);
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 2)],
            ReturnType::Pids,
        ));
        stream.tx_ops.push(TxOp::Rollback);
        let rolled_back = send(&store, stream).pins[0].id.unwrap();
        assert_eq!(store.pin_count(), 1);

        // Identifiers are never reused, even after a rollback.
        let mut stream = WireStream::default();
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 3)],
            ReturnType::Pids,
        ));
        let third = send(&store, stream).pins[0].id.unwrap();
        assert!(first.id < rolled_back.id);
        assert!(rolled_back.id < third.id);
    }

    #[test]
    fn count_query_over_get() {
        let store = MemoryStore::new();
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "x".into() });
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 1)],
            ReturnType::Pids,
        ));
        send(&store, stream);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let body = rt
            .block_on(store.get("/db?q=SELECT%20*%20WHERE%20EXISTS(x)&i=pathsql&o=json&type=count"))
            .unwrap();
        assert_eq!(&body[..], b"1");
    }

    #[test]
    fn delete_record_removes_pin_and_yields_no_result() {
        let store = MemoryStore::new();
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "x".into() });
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 1)],
            ReturnType::Pids,
        ));
        let response = send(&store, stream);
        let pid = response.pins[0].id.unwrap();

        let mut stream = WireStream::default();
        stream.pins.push(PinRecord {
            op: PinOp::Delete,
            id: Some(pid),
            values: vec![],
            rtt: ReturnType::Pids,
            n_values: 0,
        });
        let response = send(&store, stream);
        assert_eq!(store.pin_count(), 0);
        assert!(response.pins.is_empty());
    }

    #[test]
    fn scalar_becomes_collection_on_element_insert() {
        let store = MemoryStore::new();
        let mut stream = WireStream::default();
        stream.properties.push(PropMapping { id: 0x100, name: "x".into() });
        stream.pins.push(insert_record(
            vec![int_value(0x100, OpCode::Set, EID_COLLECTION, 1)],
            ReturnType::Pids,
        ));
        let pid = send(&store, stream).pins[0].id.unwrap();

        let mut stream = WireStream::default();
        stream.pins.push(PinRecord {
            op: PinOp::Update,
            id: Some(pid),
            values: vec![int_value(0x100, OpCode::Add, EID_LAST_ELEMENT, 2)],
            rtt: ReturnType::Pins,
            n_values: 1,
        });
        send(&store, stream);

        let mut stream = WireStream::default();
        stream.stmts.push(Statement {
            text: format!("SELECT * FROM @{:x};", pid.id),
            cid: 1,
            rtt: ReturnType::Pins,
            limit: None,
            offset: None,
        });
        let response = send(&store, stream);
        let WirePayload::Array(elements) = &response.pins[0].values[0].payload else {
            panic!("expected the scalar to have become a collection");
        };
        assert_eq!(elements.len(), 2);
    }
}
