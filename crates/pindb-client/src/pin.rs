//! PIN: the store's fundamental object, presented as a map from property
//! names to native values.
//!
//! A `Pin` is a cheap-clone handle over shared state, so an update payload
//! can keep a back-reference to the PIN it applies to and reconciliation can
//! write store-assigned identifiers onto the right instance. Per-value wire
//! metadata lives alongside each value; collection properties keep their
//! values and metadata index-aligned (see [`crate::collection`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use pindb_proto::{
    decode, to_wire_value, Decoded, PinOp, PinRecord, PropertyDictionary, ReadContext,
    ReturnType, WirePayload, WireStream, WireValue,
};
use pindb_types::{OpCode, Pid, Value, ValueMeta, EID_COLLECTION};

use crate::collection::{CollectionHandle, Elements};
use crate::error::{ClientError, ClientResult};
use crate::tx::TxContext;

/// One property's in-memory state.
pub(crate) enum Slot {
    Scalar { value: Value, meta: ValueMeta },
    Collection(Elements),
}

pub(crate) struct PinInner {
    pub(crate) pid: Option<Pid>,
    pub(crate) slots: BTreeMap<String, Slot>,
    /// Set on update payloads: the PIN the update is logically attributed
    /// to. Reconciliation redirects through this.
    pub(crate) update_of: Option<Pin>,
}

/// Value being assigned to a property: a bare scalar, a scalar with explicit
/// wire hints, or a sequence (which materializes as an ordered collection).
#[derive(Clone, Debug)]
pub enum PropValue {
    Scalar(Value),
    ScalarWith(Value, ValueMeta),
    Sequence(Vec<Value>),
    SequenceWith(Vec<(Value, ValueMeta)>),
}

impl From<Value> for PropValue {
    fn from(v: Value) -> Self {
        PropValue::Scalar(v)
    }
}

impl From<(Value, ValueMeta)> for PropValue {
    fn from((v, m): (Value, ValueMeta)) -> Self {
        PropValue::ScalarWith(v, m)
    }
}

impl From<Vec<Value>> for PropValue {
    fn from(vs: Vec<Value>) -> Self {
        PropValue::Sequence(vs)
    }
}

impl From<Vec<(Value, ValueMeta)>> for PropValue {
    fn from(pairs: Vec<(Value, ValueMeta)>) -> Self {
        PropValue::SequenceWith(pairs)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Scalar(Value::from(s))
    }
}

impl From<i32> for PropValue {
    fn from(i: i32) -> Self {
        PropValue::Scalar(Value::from(i))
    }
}

impl From<i64> for PropValue {
    fn from(i: i64) -> Self {
        PropValue::Scalar(Value::from(i))
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Scalar(Value::from(b))
    }
}

impl From<f64> for PropValue {
    fn from(f: f64) -> Self {
        PropValue::Scalar(Value::from(f))
    }
}

/// Handle to one PIN.
#[derive(Clone)]
pub struct Pin {
    inner: Arc<Mutex<PinInner>>,
}

impl Default for Pin {
    fn default() -> Self {
        Self::new()
    }
}

impl Pin {
    /// Create an empty, unsaved PIN.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PinInner {
                pid: None,
                slots: BTreeMap::new(),
                update_of: None,
            })),
        }
    }

    /// Create an unsaved PIN from property descriptions.
    pub fn with<I, K, V>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropValue>,
    {
        let pin = Self::new();
        {
            let mut inner = pin.lock();
            for (key, value) in props {
                assign_slot(&mut inner, &key.into(), value.into());
            }
        }
        pin
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PinInner> {
        self.inner.lock().expect("PIN mutex poisoned")
    }

    // ---- Read surface ----

    /// The store-assigned identifier, if the PIN has been saved or loaded.
    pub fn pid(&self) -> Option<Pid> {
        self.lock().pid
    }

    pub fn is_persisted(&self) -> bool {
        self.lock().pid.is_some()
    }

    pub fn properties(&self) -> Vec<String> {
        self.lock().slots.keys().cloned().collect()
    }

    pub fn contains(&self, property: &str) -> bool {
        self.lock().slots.contains_key(property)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    /// Scalar value of a property, if present and scalar.
    pub fn value(&self, property: &str) -> Option<Value> {
        match self.lock().slots.get(property) {
            Some(Slot::Scalar { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Values of a collection property, if present and a collection.
    pub fn elements(&self, property: &str) -> Option<Vec<Value>> {
        match self.lock().slots.get(property) {
            Some(Slot::Collection(elements)) => Some(elements.values().to_vec()),
            _ => None,
        }
    }

    /// Element ids of a collection property, index-aligned with
    /// [`Pin::elements`].
    pub fn element_ids(&self, property: &str) -> Option<Vec<u32>> {
        match self.lock().slots.get(property) {
            Some(Slot::Collection(elements)) => {
                Some(elements.metas().iter().map(|m| m.eid).collect())
            }
            _ => None,
        }
    }

    /// Wire metadata of a value: the scalar's (or single element's) with
    /// `eid == None`, or the collection element with the given element id.
    pub fn meta_of(&self, property: &str, eid: Option<u32>) -> ClientResult<ValueMeta> {
        let inner = self.lock();
        let slot = inner
            .slots
            .get(property)
            .ok_or_else(|| ClientError::InvalidArgument(format!("no such property: {property}")))?;
        match (slot, eid) {
            (Slot::Scalar { meta, .. }, None) => Ok(*meta),
            (Slot::Collection(elements), None) if elements.len() == 1 => Ok(elements.metas()[0]),
            (Slot::Collection(elements), Some(eid)) => elements
                .metas()
                .iter()
                .find(|m| m.eid == eid)
                .copied()
                .ok_or_else(|| ClientError::InvalidArgument(format!("no element with id {eid}"))),
            _ => Err(ClientError::InvalidArgument(
                "ambiguous value; pass an element id".into(),
            )),
        }
    }

    /// The PIN this instance is an update payload for, if any.
    pub fn update_of(&self) -> Option<Pin> {
        self.lock().update_of.clone()
    }

    /// Mutation handle for a collection property.
    pub fn collection(&self, property: &str) -> ClientResult<CollectionHandle> {
        let inner = self.lock();
        match inner.slots.get(property) {
            Some(Slot::Collection(_)) => Ok(CollectionHandle::new(self.clone(), property)),
            Some(_) => Err(ClientError::InvalidArgument(format!(
                "property {property} is not a collection"
            ))),
            None => Err(ClientError::InvalidArgument(format!("no such property: {property}"))),
        }
    }

    // ---- Mutation surface ----

    /// Assign a property. On an identified PIN the single-property delta is
    /// handed to the transaction context: deferred while a transaction is
    /// open (unless immediate mode is set), sent right away otherwise.
    pub async fn set(
        &self,
        ctx: &mut TxContext,
        property: &str,
        value: impl Into<PropValue>,
    ) -> ClientResult<()> {
        let value = value.into();
        let update = {
            let mut inner = self.lock();
            let update = inner
                .pid
                .map(|pid| self.make_update(pid, property, value.clone()));
            assign_slot(&mut inner, property, value);
            update
        };
        if let Some(update) = update {
            ctx.handle_update(update).await?;
        }
        Ok(())
    }

    /// Assign a property on an unsaved PIN, without a transaction context.
    pub fn set_local(&self, property: &str, value: impl Into<PropValue>) -> ClientResult<()> {
        let mut inner = self.lock();
        if inner.pid.is_some() {
            return Err(ClientError::InvalidArgument(
                "mutating a persisted PIN requires a transaction context".into(),
            ));
        }
        assign_slot(&mut inner, property, value.into());
        Ok(())
    }

    /// Drop a property. On an identified PIN this emits a whole-property
    /// DELETE. Returns whether the property existed locally.
    pub async fn remove(&self, ctx: &mut TxContext, property: &str) -> ClientResult<bool> {
        let (existed, update) = {
            let mut inner = self.lock();
            let existed = inner.slots.remove(property).is_some();
            let update = inner.pid.map(|pid| {
                self.make_update(
                    pid,
                    property,
                    PropValue::ScalarWith(
                        Value::Int(0),
                        ValueMeta::coll_op(OpCode::Delete, EID_COLLECTION),
                    ),
                )
            });
            (existed, update)
        };
        if let Some(update) = update {
            ctx.handle_update(update).await?;
        }
        Ok(existed)
    }

    /// Overwrite the whole property map: assigns every given property and
    /// removes every property not named, so the net effect is a plain
    /// overwrite.
    pub async fn replace_all<I, K, V>(&self, ctx: &mut TxContext, props: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropValue>,
    {
        let old_keys = self.properties();
        let mut assigned = Vec::new();
        for (key, value) in props {
            let key = key.into();
            self.set(ctx, &key, value.into()).await?;
            assigned.push(key);
        }
        for key in old_keys {
            if !assigned.contains(&key) {
                self.remove(ctx, &key).await?;
            }
        }
        Ok(())
    }

    /// Save this PIN: insert if unidentified, update otherwise. Forces a
    /// round trip and back-fills the identifier and any element ids the
    /// store generated.
    pub async fn save(&self, ctx: &mut TxContext) -> ClientResult<()> {
        ctx.save_pins(std::slice::from_ref(self)).await
    }

    /// Save several PINs in one round trip.
    pub async fn save_all(ctx: &mut TxContext, pins: &[Pin]) -> ClientResult<()> {
        ctx.save_pins(pins).await
    }

    /// Re-read the whole PIN from the store, replacing local state and
    /// discarding accumulated metadata.
    pub async fn reload(&self, ctx: &mut TxContext) -> ClientResult<()> {
        let pid = self.pid().ok_or(ClientError::NotPersisted)?;
        let stream = ctx.query(&format!("SELECT * FROM {pid};"), None, None).await?;
        let read_ctx = ReadContext::new(&stream);
        let record = stream.pins.first().ok_or(ClientError::PinNotFound(pid))?;
        self.load_record(&read_ctx, record);
        Ok(())
    }

    /// Delete the PIN from the store. The local identifier is cleared once
    /// the operation has been queued.
    pub async fn delete(&self, ctx: &mut TxContext) -> ClientResult<()> {
        let pid = self.pid().ok_or(ClientError::NotPersisted)?;
        ctx.delete_pins(&[pid]).await?;
        self.lock().pid = None;
        Ok(())
    }

    /// Forget the identifier and all local state. Does not touch the store.
    pub fn clear_local(&self) {
        let mut inner = self.lock();
        inner.pid = None;
        inner.slots.clear();
    }

    // ---- Loading ----

    /// Materialize every PIN record of a response stream.
    pub fn load_pins(stream: &WireStream) -> Vec<Pin> {
        let read_ctx = ReadContext::new(stream);
        stream
            .pins
            .iter()
            .map(|record| {
                let pin = Pin::new();
                pin.load_record(&read_ctx, record);
                pin
            })
            .collect()
    }

    pub(crate) fn load_record(&self, read_ctx: &ReadContext, record: &PinRecord) {
        let mut inner = self.lock();
        inner.pid = None;
        inner.slots.clear();
        for v in &record.values {
            let name = match read_ctx.name_of(v.prop) {
                Some(name) => name.to_string(),
                None => {
                    warn!(prop = v.prop, "response property id with no name");
                    v.prop.to_string()
                }
            };
            match decode(v, read_ctx) {
                Ok(Decoded::Single(value, meta)) => {
                    inner.slots.insert(name, Slot::Scalar { value, meta });
                }
                Ok(Decoded::Many(items)) => {
                    inner.slots.insert(name, Slot::Collection(Elements::from_pairs(items)));
                }
                Err(e) => warn!(property = %name, error = %e, "skipping value the driver cannot represent"),
            }
        }
        // Assigned last: an identified PIN records updates on assignment.
        inner.pid = record.id.map(Pid::from);
    }

    // ---- Serialization and reconciliation (driver internals) ----

    /// Build an update payload attributed to this PIN.
    pub(crate) fn make_update(&self, pid: Pid, property: &str, value: PropValue) -> Pin {
        let update = Pin::new();
        {
            let mut inner = update.lock();
            inner.pid = Some(pid);
            assign_slot(&mut inner, property, value);
            inner.update_of = Some(self.clone());
        }
        update
    }

    /// Every property name this PIN serializes: its own keys plus property
    /// names referenced by embedded references.
    pub(crate) fn referenced_property_names(&self) -> Vec<String> {
        let inner = self.lock();
        let mut names = Vec::new();
        for (key, slot) in &inner.slots {
            names.push(key.clone());
            let mut push_ref = |value: &Value| {
                if let Value::Ref(r) = value {
                    if let Some(prop) = r.property_name() {
                        names.push(prop.to_string());
                    }
                }
            };
            match slot {
                Slot::Scalar { value, .. } => push_ref(value),
                Slot::Collection(elements) => elements.values().iter().for_each(&mut push_ref),
            }
        }
        names
    }

    /// Serialize into one mutation record. Every property name must already
    /// be in the dictionary.
    pub(crate) fn build_record(&self, dict: &PropertyDictionary) -> ClientResult<PinRecord> {
        let inner = self.lock();
        let (op, id) = match inner.pid {
            Some(pid) => (PinOp::Update, Some(pid.into())),
            None => (PinOp::Insert, None),
        };
        let mut values = Vec::new();
        for (key, slot) in &inner.slots {
            let prop = dict
                .resolve(key)
                .ok_or_else(|| pindb_proto::ProtocolError::PropertyNotPrepared(key.clone()))?;
            match slot {
                Slot::Scalar { value, meta } => {
                    values.push(to_wire_value(value, meta, meta.prop_id.unwrap_or(prop), dict)?);
                }
                Slot::Collection(elements) => {
                    for (value, meta) in elements.iter() {
                        values.push(to_wire_value(value, meta, meta.prop_id.unwrap_or(prop), dict)?);
                    }
                }
            }
        }
        let rtt = if values.iter().any(|v| v.op.inserts_element()) {
            ReturnType::Pins
        } else {
            ReturnType::Pids
        };
        Ok(PinRecord { op, id, n_values: values.len() as u32, values, rtt })
    }

    /// The PIN that response results should be applied to: the update
    /// target when this is an update payload, this PIN otherwise.
    pub(crate) fn resolve_target(&self) -> Pin {
        let inner = self.lock();
        inner.update_of.clone().unwrap_or_else(|| self.clone())
    }

    /// Whether this instance is an update payload for another PIN.
    pub fn is_update_payload(&self) -> bool {
        self.lock().update_of.is_some()
    }

    /// Accept a store-assigned identifier. `Err` carries the conflicting
    /// identifier already held.
    pub(crate) fn apply_saved_pid(&self, pid: Pid) -> Result<(), Pid> {
        let mut inner = self.lock();
        match inner.pid {
            None => {
                inner.pid = Some(pid);
                Ok(())
            }
            Some(existing) if existing == pid => Ok(()),
            Some(existing) => Err(existing),
        }
    }

    /// Replace placeholder element ids with store-assigned ones from a
    /// response record's values.
    pub(crate) fn fill_element_ids(&self, read_ctx: &ReadContext, values: &[WireValue]) {
        let mut inner = self.lock();
        for v in values {
            let Some(name) = read_ctx.name_of(v.prop) else {
                debug!(prop = v.prop, "response value with unresolvable property");
                continue;
            };
            let Some(slot) = inner.slots.get_mut(name) else {
                debug!(property = name, "response value for an absent property");
                continue;
            };
            match (slot, &v.payload) {
                (Slot::Collection(elements), WirePayload::Array(response)) => {
                    for (i, element) in response.iter().enumerate() {
                        if let Some(meta) = elements.meta_mut(i) {
                            if meta.is_placeholder_eid() {
                                debug!(property = name, eid = element.eid, "obtained element id");
                                meta.eid = element.eid;
                                // The element is persisted now; a later
                                // serialization must address it, not re-add
                                // it.
                                meta.op = OpCode::Set;
                            }
                        }
                    }
                }
                (Slot::Collection(elements), _) if v.op.inserts_element() => {
                    if let Some(meta) = elements.first_placeholder_mut() {
                        debug!(property = name, eid = v.eid, "obtained element id");
                        meta.eid = v.eid;
                        meta.op = OpCode::Set;
                    }
                }
                _ => debug!(property = name, "no element id to reconcile"),
            }
        }
    }

    /// Access the collection slot of a property, with the identifier, under
    /// one lock.
    pub(crate) fn with_collection<R>(
        &self,
        property: &str,
        f: impl FnOnce(&mut Elements, Option<Pid>) -> ClientResult<R>,
    ) -> ClientResult<R> {
        let mut inner = self.lock();
        let pid = inner.pid;
        match inner.slots.get_mut(property) {
            Some(Slot::Collection(elements)) => f(elements, pid),
            Some(_) => Err(ClientError::InvalidArgument(format!(
                "property {property} is not a collection"
            ))),
            None => Err(ClientError::InvalidArgument(format!("no such property: {property}"))),
        }
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Pin")
            .field("pid", &inner.pid)
            .field("properties", &inner.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn assign_slot(inner: &mut PinInner, property: &str, value: PropValue) {
    let slot = match value {
        PropValue::Scalar(v) => Slot::Scalar { value: v, meta: ValueMeta::default() },
        PropValue::ScalarWith(v, meta) => Slot::Scalar { value: v, meta },
        PropValue::Sequence(vs) => Slot::Collection(Elements::appended(vs)),
        PropValue::SequenceWith(pairs) => Slot::Collection(Elements::from_pairs(pairs)),
    };
    inner.slots.insert(property.to_string(), slot);
}
