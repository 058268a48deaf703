use serde::{Deserialize, Serialize};

use pindb_types::{OpCode, Pid, WireType};

/// Upper bound on a single serialized segment.
pub const MAX_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// PIN identifier as it travels on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePid {
    pub id: u64,
    pub ident: u32,
}

impl From<Pid> for WirePid {
    fn from(pid: Pid) -> Self {
        Self { id: pid.local_id(), ident: pid.ident() }
    }
}

impl From<WirePid> for Pid {
    fn from(w: WirePid) -> Self {
        Pid::new(w.id, w.ident)
    }
}

/// Property or element reference as it travels on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRef {
    pub id: WirePid,
    pub prop: u32,
    pub eid: Option<u32>,
}

/// Typed payload of a wire value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WirePayload {
    None,
    Str(String),
    Bstr(Vec<u8>),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    /// Microseconds since the store epoch.
    DateTime(i64),
    Pid(WirePid),
    Ref(WireRef),
    Array(Vec<WireValue>),
    PropId(u32),
}

impl WirePayload {
    /// The payload kind name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            WirePayload::None => "None",
            WirePayload::Str(_) => "Str",
            WirePayload::Bstr(_) => "Bstr",
            WirePayload::I32(_) => "I32",
            WirePayload::U32(_) => "U32",
            WirePayload::I64(_) => "I64",
            WirePayload::U64(_) => "U64",
            WirePayload::F32(_) => "F32",
            WirePayload::F64(_) => "F64",
            WirePayload::Bool(_) => "Bool",
            WirePayload::DateTime(_) => "DateTime",
            WirePayload::Pid(_) => "Pid",
            WirePayload::Ref(_) => "Ref",
            WirePayload::Array(_) => "Array",
            WirePayload::PropId(_) => "PropId",
        }
    }
}

/// One value of a PIN mutation record: property id, wire metadata, payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireValue {
    pub prop: u32,
    pub wtype: WireType,
    pub op: OpCode,
    pub eid: u32,
    pub flags: u32,
    pub payload: WirePayload,
}

/// Operation applied to a whole PIN record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinOp {
    Insert,
    Update,
    Delete,
}

/// What the store should return for a mutation record or statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnType {
    /// Identifiers only.
    Pids,
    /// Full PIN records, including element ids for inserted elements.
    Pins,
}

/// One PIN mutation record inside a segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinRecord {
    pub op: PinOp,
    pub id: Option<WirePid>,
    pub values: Vec<WireValue>,
    pub rtt: ReturnType,
    pub n_values: u32,
}

impl PinRecord {
    /// Whether any value op will make the store assign new element ids.
    pub fn inserts_collection_elements(&self) -> bool {
        self.values.iter().any(|v| v.op.inserts_element())
    }
}

/// Opaque query text submitted through the stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    pub cid: u64,
    pub rtt: ReturnType,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Transaction-control marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOp {
    Start,
    Commit,
    Rollback,
}

/// Dictionary update: one property name/id mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropMapping {
    pub id: u32,
    pub name: String,
}

/// Body of one wire segment. A message is a concatenation of framed
/// segments; the transport treats each as an opaque blob.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireStream {
    pub properties: Vec<PropMapping>,
    pub pins: Vec<PinRecord>,
    pub stmts: Vec<Statement>,
    pub tx_ops: Vec<TxOp>,
    pub flush: Vec<u32>,
}

impl WireStream {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
            && self.pins.is_empty()
            && self.stmts.is_empty()
            && self.tx_ops.is_empty()
            && self.flush.is_empty()
    }

    /// Whether a round trip carrying this segment produces output the
    /// driver must reconcile: inserts (new pids), records returning full
    /// PINs (new eids), or statements (query results).
    pub fn expects_output(&self) -> bool {
        !self.stmts.is_empty()
            || self
                .pins
                .iter()
                .any(|p| p.op == PinOp::Insert || p.rtt == ReturnType::Pins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pindb_types::{EID_COLLECTION, EID_LAST_ELEMENT};

    fn value(op: OpCode) -> WireValue {
        WireValue {
            prop: 0x100,
            wtype: WireType::Int,
            op,
            eid: EID_LAST_ELEMENT,
            flags: 0,
            payload: WirePayload::I32(1),
        }
    }

    fn record(op: PinOp, rtt: ReturnType, values: Vec<WireValue>) -> PinRecord {
        let n_values = values.len() as u32;
        PinRecord { op, id: None, values, rtt, n_values }
    }

    #[test]
    fn empty_stream() {
        let stream = WireStream::default();
        assert!(stream.is_empty());
        assert!(!stream.expects_output());
    }

    #[test]
    fn insert_expects_output() {
        let mut stream = WireStream::default();
        stream.pins.push(record(PinOp::Insert, ReturnType::Pids, vec![]));
        assert!(stream.expects_output());
    }

    #[test]
    fn update_returning_pins_expects_output() {
        let mut stream = WireStream::default();
        stream
            .pins
            .push(record(PinOp::Update, ReturnType::Pins, vec![value(OpCode::Add)]));
        assert!(stream.expects_output());
    }

    #[test]
    fn plain_update_expects_nothing() {
        let mut stream = WireStream::default();
        stream
            .pins
            .push(record(PinOp::Update, ReturnType::Pids, vec![value(OpCode::Set)]));
        assert!(!stream.expects_output());
    }

    #[test]
    fn statement_expects_output() {
        let mut stream = WireStream::default();
        stream.stmts.push(Statement {
            text: "SELECT *;".into(),
            cid: 1,
            rtt: ReturnType::Pins,
            limit: None,
            offset: None,
        });
        assert!(stream.expects_output());
    }

    #[test]
    fn inserts_collection_elements_detection() {
        let rec = record(
            PinOp::Update,
            ReturnType::Pins,
            vec![value(OpCode::Set), value(OpCode::AddBefore)],
        );
        assert!(rec.inserts_collection_elements());
        let rec = record(PinOp::Update, ReturnType::Pids, vec![value(OpCode::Set)]);
        assert!(!rec.inserts_collection_elements());
    }

    #[test]
    fn wire_pid_conversion() {
        let pid = Pid::new(77, 3);
        let wire: WirePid = pid.into();
        assert_eq!(Pid::from(wire), pid);
    }

    #[test]
    fn scalar_metas_use_collection_sentinel() {
        let v = WireValue {
            prop: 0x100,
            wtype: WireType::String,
            op: OpCode::Set,
            eid: EID_COLLECTION,
            flags: 0,
            payload: WirePayload::Str("x".into()),
        };
        assert_eq!(v.eid, EID_COLLECTION);
    }
}
