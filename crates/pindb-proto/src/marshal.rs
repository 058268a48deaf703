//! Bidirectional marshaling between native [`Value`]s and the wire's tagged
//! representation.
//!
//! `encode` infers a wire tag when the value's metadata carries none; a tag
//! pinned by a prior read is honored whenever the new value is representable
//! in it, and re-inferred otherwise. `decode` is the exact inverse, with
//! best-effort property-id resolution: an id the response dictionary cannot
//! resolve decodes to the raw number and a diagnostic, never a failure.

use tracing::warn;

use pindb_types::{from_store_micros, to_store_micros, PinRef, Value, ValueMeta, WireType};

use crate::dict::{PropertyDictionary, ReadContext};
use crate::error::{ProtocolError, ProtocolResult};
use crate::stream::{WirePayload, WireRef, WireValue};

/// Result of decoding one wire value: a single native value, or the decoded
/// elements of a wire array, each with its own metadata.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Single(Value, ValueMeta),
    Many(Vec<(Value, ValueMeta)>),
}

/// Encode a native value, honoring the metadata's pinned wire type where it
/// can represent the value. Returns the payload and the final wire tag.
///
/// Reference values with a property name require the name to be present in
/// the dictionary (see property-id preparation in the client).
pub fn encode(
    value: &Value,
    meta: &ValueMeta,
    dict: &PropertyDictionary,
) -> ProtocolResult<(WirePayload, WireType)> {
    let pinned = meta.wtype;
    Ok(match value {
        Value::Str(s) => (WirePayload::Str(s.clone()), WireType::String),
        Value::Url(s) => (WirePayload::Str(s.clone()), WireType::Url),
        Value::Bytes(b) => (WirePayload::Bstr(b.clone()), WireType::Bstr),
        Value::Bool(b) => (WirePayload::Bool(*b), WireType::Bool),
        Value::Int(i) => encode_integral(i128::from(*i), pinned),
        Value::UInt64(u) => encode_integral(i128::from(*u), pinned),
        Value::F32(f) => (WirePayload::F32(*f), WireType::Float),
        Value::F64(f) => {
            if pinned == WireType::Float {
                (WirePayload::F32(*f as f32), WireType::Float)
            } else {
                (WirePayload::F64(*f), WireType::Double)
            }
        }
        Value::DateTime(ts) => (WirePayload::DateTime(to_store_micros(ts)), WireType::DateTime),
        Value::Ref(r) => match (r.property_name(), r.eid()) {
            (Some(name), eid) => {
                let prop = dict
                    .resolve(name)
                    .ok_or_else(|| ProtocolError::PropertyNotPrepared(name.to_string()))?;
                let wire_ref = WireRef { id: r.pid().into(), prop, eid };
                let wtype = if eid.is_some() { WireType::RefIdElt } else { WireType::RefIdProp };
                (WirePayload::Ref(wire_ref), wtype)
            }
            (None, _) => (WirePayload::Pid(r.pid().into()), WireType::RefId),
        },
    })
}

/// Build a complete wire value from a native value and its metadata.
pub fn to_wire_value(
    value: &Value,
    meta: &ValueMeta,
    prop: u32,
    dict: &PropertyDictionary,
) -> ProtocolResult<WireValue> {
    let (payload, wtype) = encode(value, meta, dict)?;
    Ok(WireValue { prop, wtype, op: meta.op, eid: meta.eid, flags: meta.flags, payload })
}

/// Select the smallest integral tag that fits, unless a pinned tag can
/// already represent the value. Fit order: signed-32, unsigned-32,
/// signed-64, unsigned-64.
fn encode_integral(v: i128, pinned: WireType) -> (WirePayload, WireType) {
    let in_i32 = i32::try_from(v).is_ok();
    let in_u32 = u32::try_from(v).is_ok();
    let in_i64 = i64::try_from(v).is_ok();
    match pinned {
        WireType::Int if in_i32 => (WirePayload::I32(v as i32), WireType::Int),
        WireType::UInt if in_u32 => (WirePayload::U32(v as u32), WireType::UInt),
        WireType::Int64 if in_i64 => (WirePayload::I64(v as i64), WireType::Int64),
        WireType::UInt64 if v >= 0 => (WirePayload::U64(v as u64), WireType::UInt64),
        _ if in_i32 => (WirePayload::I32(v as i32), WireType::Int),
        _ if in_u32 => (WirePayload::U32(v as u32), WireType::UInt),
        _ if in_i64 => (WirePayload::I64(v as i64), WireType::Int64),
        _ => (WirePayload::U64(v as u64), WireType::UInt64),
    }
}

/// Decode one wire value into native form. Arrays decode recursively into
/// one entry per element.
pub fn decode(wire: &WireValue, ctx: &ReadContext) -> ProtocolResult<Decoded> {
    if wire.wtype == WireType::Array {
        let WirePayload::Array(elements) = &wire.payload else {
            return Err(mismatch(wire));
        };
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            match decode(element, ctx)? {
                Decoded::Single(value, meta) => out.push((value, meta)),
                Decoded::Many(_) => {
                    return Err(ProtocolError::Deserialization(
                        "nested array value".into(),
                    ))
                }
            }
        }
        return Ok(Decoded::Many(out));
    }

    let meta = ValueMeta {
        prop_id: (wire.prop != 0).then_some(wire.prop),
        wtype: wire.wtype,
        op: wire.op,
        eid: wire.eid,
        flags: wire.flags,
    };
    let value = match (wire.wtype, &wire.payload) {
        (WireType::String, WirePayload::Str(s)) => Value::Str(s.clone()),
        (WireType::Url, WirePayload::Str(s)) => Value::Url(s.clone()),
        (WireType::Bstr, WirePayload::Bstr(b)) => Value::Bytes(b.clone()),
        (WireType::Int, WirePayload::I32(i)) => Value::Int(i64::from(*i)),
        (WireType::UInt, WirePayload::U32(u)) => Value::Int(i64::from(*u)),
        (WireType::Int64, WirePayload::I64(i)) => Value::Int(*i),
        (WireType::UInt64, WirePayload::U64(u)) => match i64::try_from(*u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt64(*u),
        },
        (WireType::Float, WirePayload::F32(f)) => Value::F32(*f),
        (WireType::Double, WirePayload::F64(f)) => Value::F64(*f),
        (WireType::Bool, WirePayload::Bool(b)) => Value::Bool(*b),
        (WireType::DateTime, WirePayload::DateTime(us)) => Value::DateTime(
            from_store_micros(*us).ok_or(ProtocolError::InvalidTimestamp(*us))?,
        ),
        (WireType::RefId, WirePayload::Pid(p)) => Value::Ref(PinRef::entity((*p).into())),
        (WireType::RefIdProp, WirePayload::Ref(r)) => {
            Value::Ref(PinRef::property(r.id.into(), resolve_prop_name(r.prop, ctx)))
        }
        (WireType::RefIdElt, WirePayload::Ref(r)) => {
            let Some(eid) = r.eid else { return Err(mismatch(wire)) };
            Value::Ref(PinRef::element(r.id.into(), resolve_prop_name(r.prop, ctx), eid))
        }
        (WireType::UriId, WirePayload::PropId(id)) | (WireType::UriId, WirePayload::U32(id)) => {
            match ctx.name_of(*id) {
                Some(name) => Value::Str(name.to_string()),
                None => {
                    warn!(id, "could not resolve property id; keeping raw value");
                    Value::Int(i64::from(*id))
                }
            }
        }
        (WireType::Any, _) => return Err(ProtocolError::UntypedValue),
        _ => return Err(mismatch(wire)),
    };
    Ok(Decoded::Single(value, meta))
}

fn resolve_prop_name(id: u32, ctx: &ReadContext) -> String {
    match ctx.name_of(id) {
        Some(name) => name.to_string(),
        None => {
            warn!(id, "could not resolve reference property id");
            id.to_string()
        }
    }
}

fn mismatch(wire: &WireValue) -> ProtocolError {
    ProtocolError::PayloadMismatch { wtype: wire.wtype, payload: wire.payload.kind() }
}
