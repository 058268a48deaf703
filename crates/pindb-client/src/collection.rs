//! Ordered collection properties.
//!
//! [`Elements`] keeps a collection's native values and their wire metadata
//! in two index-aligned sequences; every structural mutation updates both.
//! [`CollectionHandle`] is the vetted mutation surface: each operation keeps
//! the local sequences in sync and, when the owning PIN is identified,
//! emits wire operations addressed by element id, never by position.
//! Reorders go through a three-step diff that only touches displaced
//! elements, so sorting an already-sorted collection emits nothing.

use std::cmp::Ordering;

use rand::seq::SliceRandom;

use pindb_types::{
    OpCode, Pid, Value, ValueMeta, WireType, EID_FIRST_ELEMENT, EID_LAST_ELEMENT,
};

use crate::error::{ClientError, ClientResult};
use crate::pin::{Pin, PropValue};
use crate::tx::TxContext;

/// Parallel value/metadata sequences of one collection property. The two
/// sequences are always the same length and index-aligned.
pub struct Elements {
    values: Vec<Value>,
    metas: Vec<ValueMeta>,
}

impl Elements {
    /// Build from bare values, with append semantics (op = ADD, element id
    /// = the last-element sentinel) for each.
    pub(crate) fn appended(values: Vec<Value>) -> Self {
        let metas = values
            .iter()
            .map(|_| ValueMeta::coll_op(OpCode::Add, EID_LAST_ELEMENT))
            .collect();
        Self { values, metas }
    }

    /// Build from value/metadata pairs (decoded wire arrays, explicit
    /// hints).
    pub(crate) fn from_pairs(pairs: Vec<(Value, ValueMeta)>) -> Self {
        let (values, metas) = pairs.into_iter().unzip();
        Self { values, metas }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn metas(&self) -> &[ValueMeta] {
        &self.metas
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Value, &ValueMeta)> {
        self.values.iter().zip(self.metas.iter())
    }

    pub(crate) fn eid_at(&self, index: usize) -> u32 {
        self.metas[index].eid
    }

    pub(crate) fn meta_mut(&mut self, index: usize) -> Option<&mut ValueMeta> {
        self.metas.get_mut(index)
    }

    pub(crate) fn first_placeholder_mut(&mut self) -> Option<&mut ValueMeta> {
        self.metas.iter_mut().find(|m| m.is_placeholder_eid())
    }

    pub(crate) fn position_of_eid(&self, eid: u32) -> Option<usize> {
        self.metas.iter().position(|m| m.eid == eid)
    }

    pub(crate) fn insert(&mut self, index: usize, value: Value, meta: ValueMeta) {
        self.values.insert(index, value);
        self.metas.insert(index, meta);
    }

    pub(crate) fn remove(&mut self, index: usize) -> (Value, ValueMeta) {
        (self.values.remove(index), self.metas.remove(index))
    }

    pub(crate) fn set_value(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    pub(crate) fn relocate_meta(&mut self, from: usize, to: usize) {
        let meta = self.metas.remove(from);
        self.metas.insert(to, meta);
    }

    pub(crate) fn set_values(&mut self, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.metas.len());
        self.values = values;
    }

    pub(crate) fn set_metas(&mut self, metas: Vec<ValueMeta>) {
        debug_assert_eq!(metas.len(), self.values.len());
        self.metas = metas;
    }
}

/// Mutation handle for one collection property of one PIN.
pub struct CollectionHandle {
    pin: Pin,
    property: String,
}

impl CollectionHandle {
    pub(crate) fn new(pin: Pin, property: &str) -> Self {
        Self { pin, property: property.to_string() }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn len(&self) -> ClientResult<usize> {
        self.pin.with_collection(&self.property, |els, _| Ok(els.len()))
    }

    pub fn is_empty(&self) -> ClientResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn values(&self) -> ClientResult<Vec<Value>> {
        self.pin.with_collection(&self.property, |els, _| Ok(els.values().to_vec()))
    }

    pub fn get(&self, index: usize) -> ClientResult<Option<Value>> {
        self.pin
            .with_collection(&self.property, |els, _| Ok(els.values().get(index).cloned()))
    }

    /// Insert at `index`. Emits ADD_BEFORE anchored at the element currently
    /// there (or the first-element sentinel at index 0), or ADD with the
    /// last-element sentinel when appending.
    pub async fn insert(
        &self,
        ctx: &mut TxContext,
        index: usize,
        value: impl Into<Value>,
    ) -> ClientResult<()> {
        let value = value.into();
        let wire = self.pin.with_collection(&self.property, |els, pid| {
            let len = els.len();
            if index > len {
                return Err(ClientError::OutOfRange { index, len });
            }
            let (op, anchor) = if index == 0 {
                (OpCode::AddBefore, EID_FIRST_ELEMENT)
            } else if index < len {
                (OpCode::AddBefore, els.eid_at(index))
            } else {
                (OpCode::Add, EID_LAST_ELEMENT)
            };
            // Placeholder metadata; the element id arrives with the store's
            // response.
            els.insert(index, value.clone(), ValueMeta::default());
            Ok(pid.map(|pid| (pid, op, anchor)))
        })?;
        if let Some((pid, op, anchor)) = wire {
            let update = self.update_pin(pid, value, ValueMeta::coll_op(op, anchor));
            ctx.handle_update(update).await?;
        }
        Ok(())
    }

    /// Append one value.
    pub async fn push(&self, ctx: &mut TxContext, value: impl Into<Value>) -> ClientResult<()> {
        let index = self.len()?;
        self.insert(ctx, index, value).await
    }

    /// Append several values.
    pub async fn extend(&self, ctx: &mut TxContext, values: Vec<Value>) -> ClientResult<()> {
        for value in values {
            self.push(ctx, value).await?;
        }
        Ok(())
    }

    /// Remove and return the last element.
    pub async fn pop(&self, ctx: &mut TxContext) -> ClientResult<Value> {
        let mut popped = self.pop_n(ctx, 1).await?;
        popped
            .pop()
            .ok_or_else(|| ClientError::InvalidArgument("pop produced no element".into()))
    }

    /// Remove and return the last `n` elements (last first). Popping zero or
    /// more elements than exist is an error.
    pub async fn pop_n(&self, ctx: &mut TxContext, n: usize) -> ClientResult<Vec<Value>> {
        if n == 0 {
            return Err(ClientError::InvalidArgument("pop count must be positive".into()));
        }
        let (popped, wire) = self.pin.with_collection(&self.property, |els, pid| {
            let len = els.len();
            if n > len {
                return Err(ClientError::InvalidArgument(format!(
                    "cannot pop {n} of {len} elements"
                )));
            }
            let mut popped = Vec::with_capacity(n);
            let mut eids = Vec::with_capacity(n);
            for _ in 0..n {
                let last = els.len() - 1;
                eids.push(els.eid_at(last));
                let (value, _) = els.remove(last);
                popped.push(value);
            }
            Ok((popped, pid.map(|pid| (pid, eids))))
        })?;
        if let Some((pid, eids)) = wire {
            for eid in eids {
                let update =
                    self.update_pin(pid, Value::Int(0), ValueMeta::coll_op(OpCode::Delete, eid));
                ctx.handle_update(update).await?;
            }
        }
        Ok(popped)
    }

    /// Replace the element at `index` in place. No element-id change.
    pub async fn set(
        &self,
        ctx: &mut TxContext,
        index: usize,
        value: impl Into<Value>,
    ) -> ClientResult<()> {
        let value = value.into();
        let wire = self.pin.with_collection(&self.property, |els, pid| {
            let len = els.len();
            if index >= len {
                return Err(ClientError::OutOfRange { index, len });
            }
            els.set_value(index, value.clone());
            Ok(pid.map(|pid| (pid, els.eid_at(index))))
        })?;
        if let Some((pid, eid)) = wire {
            let update = self.update_pin(pid, value, ValueMeta::coll_op(OpCode::Set, eid));
            ctx.handle_update(update).await?;
        }
        Ok(())
    }

    /// Remove the element at `index`, returning its value.
    pub async fn remove_at(&self, ctx: &mut TxContext, index: usize) -> ClientResult<Value> {
        let (value, wire) = self.pin.with_collection(&self.property, |els, pid| {
            let len = els.len();
            if index >= len {
                return Err(ClientError::OutOfRange { index, len });
            }
            let eid = els.eid_at(index);
            let (value, _) = els.remove(index);
            Ok((value, pid.map(|pid| (pid, eid))))
        })?;
        if let Some((pid, eid)) = wire {
            let update =
                self.update_pin(pid, Value::Int(0), ValueMeta::coll_op(OpCode::Delete, eid));
            ctx.handle_update(update).await?;
        }
        Ok(value)
    }

    /// Remove every element equal to `value` (highest index first).
    /// Returns whether anything was removed.
    pub async fn remove_value(&self, ctx: &mut TxContext, value: &Value) -> ClientResult<bool> {
        let indexes = self.pin.with_collection(&self.property, |els, _| {
            Ok(els
                .values()
                .iter()
                .enumerate()
                .filter(|(_, v)| *v == value)
                .map(|(i, _)| i)
                .collect::<Vec<_>>())
        })?;
        if indexes.is_empty() {
            return Ok(false);
        }
        for index in indexes.into_iter().rev() {
            self.remove_at(ctx, index).await?;
        }
        Ok(true)
    }

    /// Replace `count` elements starting at `start` with one value:
    /// deletions run highest index first, then the replacement is inserted
    /// at the range start.
    pub async fn replace_range(
        &self,
        ctx: &mut TxContext,
        start: usize,
        count: usize,
        value: impl Into<Value>,
    ) -> ClientResult<()> {
        if count > 0 {
            self.check_range(start, count)?;
            for index in (start..start + count).rev() {
                self.remove_at(ctx, index).await?;
            }
        }
        self.insert(ctx, start, value).await
    }

    /// Remove and return `count` elements starting at `start`.
    pub async fn drain(
        &self,
        ctx: &mut TxContext,
        start: usize,
        count: usize,
    ) -> ClientResult<Vec<Value>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.check_range(start, count)?;
        let mut drained = Vec::with_capacity(count);
        for index in (start..start + count).rev() {
            drained.push(self.remove_at(ctx, index).await?);
        }
        drained.reverse();
        Ok(drained)
    }

    /// Drop the whole property (DELETE with the whole-collection sentinel).
    pub async fn clear(&self, ctx: &mut TxContext) -> ClientResult<()> {
        self.pin.remove(ctx, &self.property).await.map(|_| ())
    }

    /// Remove later duplicates, keeping first occurrences in order.
    /// Duplicates are collected in one pass and removed highest index
    /// first. Returns whether anything changed.
    pub async fn dedup(&self, ctx: &mut TxContext) -> ClientResult<bool> {
        let duplicates = self.pin.with_collection(&self.property, |els, _| {
            let mut seen: Vec<&Value> = Vec::new();
            let mut duplicates = Vec::new();
            for (i, value) in els.values().iter().enumerate() {
                if seen.iter().any(|s| *s == value) {
                    duplicates.push(i);
                } else {
                    seen.push(value);
                }
            }
            Ok(duplicates)
        })?;
        if duplicates.is_empty() {
            return Ok(false);
        }
        for index in duplicates.into_iter().rev() {
            self.remove_at(ctx, index).await?;
        }
        Ok(true)
    }

    /// Replace every element through `f`, as per-index SETs. No element-id
    /// churn.
    pub async fn map_in_place(
        &self,
        ctx: &mut TxContext,
        mut f: impl FnMut(&Value) -> Value,
    ) -> ClientResult<()> {
        let len = self.len()?;
        for index in 0..len {
            let current = self
                .get(index)?
                .ok_or(ClientError::OutOfRange { index, len })?;
            self.set(ctx, index, f(&current)).await?;
        }
        Ok(())
    }

    // ---- Reordering ----

    /// Sort by the natural cross-kind ordering.
    pub async fn sort(&self, ctx: &mut TxContext) -> ClientResult<()> {
        self.sort_by(ctx, default_order).await
    }

    /// Sort with a caller-supplied comparator.
    pub async fn sort_by(
        &self,
        ctx: &mut TxContext,
        mut cmp: impl FnMut(&Value, &Value) -> Ordering,
    ) -> ClientResult<()> {
        let order = self.pin.with_collection(&self.property, |els, _| {
            let mut order: Vec<usize> = (0..els.len()).collect();
            order.sort_by(|&a, &b| cmp(&els.values()[a], &els.values()[b]));
            Ok(order)
        })?;
        self.apply_order(ctx, order).await
    }

    pub async fn reverse(&self, ctx: &mut TxContext) -> ClientResult<()> {
        let len = self.len()?;
        self.apply_order(ctx, (0..len).rev().collect()).await
    }

    /// Rotate left by `n`.
    pub async fn rotate(&self, ctx: &mut TxContext, n: usize) -> ClientResult<()> {
        let len = self.len()?;
        if len == 0 {
            return Ok(());
        }
        let shift = n % len;
        self.apply_order(ctx, (0..len).map(|i| (i + shift) % len).collect()).await
    }

    pub async fn shuffle(&self, ctx: &mut TxContext) -> ClientResult<()> {
        let len = self.len()?;
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rand::thread_rng());
        self.apply_order(ctx, order).await
    }

    /// Apply a target order, emitting MOVE/MOVE_BEFORE only for displaced
    /// elements: walking the target order left to right, an element already
    /// in place relative to the previously emitted one is left untouched;
    /// anything else is relocated with the preceding element's id as the
    /// anchor (or moved to the front when it becomes first).
    async fn apply_order(&self, ctx: &mut TxContext, order: Vec<usize>) -> ClientResult<()> {
        let moves = self.pin.with_collection(&self.property, |els, pid| {
            let len = els.len();
            if order.len() != len {
                return Err(ClientError::InvalidArgument(format!(
                    "order of {} entries for {len} elements",
                    order.len()
                )));
            }
            let snapshot: Vec<(Value, ValueMeta)> =
                els.iter().map(|(v, m)| (v.clone(), *m)).collect();
            let Some(pid) = pid else {
                // Unidentified: a purely local permutation.
                els.set_values(order.iter().map(|&src| snapshot[src].0.clone()).collect());
                els.set_metas(order.iter().map(|&src| snapshot[src].1).collect());
                return Ok(None);
            };
            let mut moves = Vec::new();
            let mut prev_eid = EID_FIRST_ELEMENT;
            for (target_index, &src) in order.iter().enumerate() {
                let eid = snapshot[src].1.eid;
                if els.metas()[target_index].eid == eid {
                    prev_eid = eid;
                    continue;
                }
                let Some(current) = els.position_of_eid(eid) else {
                    prev_eid = eid;
                    continue;
                };
                els.relocate_meta(current, target_index);
                let op = if prev_eid == EID_FIRST_ELEMENT {
                    OpCode::MoveBefore
                } else {
                    OpCode::Move
                };
                let meta = ValueMeta { wtype: WireType::UInt, op, eid, ..ValueMeta::default() };
                moves.push((Value::Int(i64::from(prev_eid)), meta));
                prev_eid = eid;
            }
            els.set_values(order.iter().map(|&src| snapshot[src].0.clone()).collect());
            Ok(Some((pid, moves)))
        })?;
        if let Some((pid, moves)) = moves {
            for (anchor, meta) in moves {
                let update = self.update_pin(pid, anchor, meta);
                ctx.handle_update(update).await?;
            }
        }
        Ok(())
    }

    fn check_range(&self, start: usize, count: usize) -> ClientResult<()> {
        self.pin.with_collection(&self.property, |els, _| {
            let len = els.len();
            if start >= len || start + count > len {
                return Err(ClientError::OutOfRange { index: start + count - 1, len });
            }
            Ok(())
        })
    }

    fn update_pin(&self, pid: Pid, value: Value, meta: ValueMeta) -> Pin {
        self.pin.make_update(pid, &self.property, PropValue::ScalarWith(value, meta))
    }
}

/// Natural ordering across value kinds: numerics together (by magnitude),
/// then by kind, with a total order on floats.
fn default_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::UInt64(_) | Value::F32(_) | Value::F64(_) => 1,
            Value::DateTime(_) => 2,
            Value::Str(_) | Value::Url(_) => 3,
            Value::Bytes(_) => 4,
            Value::Ref(_) => 5,
        }
    }
    fn as_float(v: &Value) -> Option<f64> {
        match v {
            Value::Int(i) => Some(*i as f64),
            Value::UInt64(u) => Some(*u as f64),
            Value::F32(f) => Some(f64::from(*f)),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Ref(x), Value::Ref(y)) => x.cmp(y),
        (Value::Str(x) | Value::Url(x), Value::Str(y) | Value::Url(y)) => x.cmp(y),
        _ => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}
