use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Element-id sentinel: no specific element. Used for scalar values and for
/// whole-collection operations.
pub const EID_COLLECTION: u32 = 0xFFFF_FFFF;
/// Element-id sentinel: append after the last element. Only valid when
/// requesting an insert position, never as a persisted identity.
pub const EID_LAST_ELEMENT: u32 = 0xFFFF_FFFE;
/// Element-id sentinel: insert before the first element. Only valid when
/// requesting an insert position, never as a persisted identity.
pub const EID_FIRST_ELEMENT: u32 = 0xFFFF_FFFD;

/// The store's value type tags, with the wire numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WireType {
    /// No type yet: the marshaler infers one at encode time.
    Any = 0,
    Int = 1,
    UInt = 2,
    Int64 = 3,
    UInt64 = 4,
    Float = 6,
    Double = 7,
    Bool = 8,
    DateTime = 9,
    /// A property id, resolved to its name through the dictionary on read.
    UriId = 11,
    String = 13,
    Bstr = 14,
    Url = 15,
    RefId = 18,
    RefIdProp = 20,
    RefIdElt = 22,
    Array = 25,
}

impl WireType {
    /// The raw wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = TypeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => WireType::Any,
            1 => WireType::Int,
            2 => WireType::UInt,
            3 => WireType::Int64,
            4 => WireType::UInt64,
            6 => WireType::Float,
            7 => WireType::Double,
            8 => WireType::Bool,
            9 => WireType::DateTime,
            11 => WireType::UriId,
            13 => WireType::String,
            14 => WireType::Bstr,
            15 => WireType::Url,
            18 => WireType::RefId,
            20 => WireType::RefIdProp,
            22 => WireType::RefIdElt,
            25 => WireType::Array,
            other => return Err(TypeError::UnknownWireType(other)),
        })
    }
}

/// Mutation operation codes carried by every wire value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    Set = 0,
    Add = 1,
    AddBefore = 2,
    Move = 3,
    MoveBefore = 4,
    Delete = 5,
}

impl OpCode {
    /// The raw wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether this operation makes the store generate a new element id.
    pub fn inserts_element(self) -> bool {
        matches!(self, OpCode::Add | OpCode::AddBefore)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = TypeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => OpCode::Set,
            1 => OpCode::Add,
            2 => OpCode::AddBefore,
            3 => OpCode::Move,
            4 => OpCode::MoveBefore,
            5 => OpCode::Delete,
            other => return Err(TypeError::UnknownOpCode(other)),
        })
    }
}

/// Wire metadata carried by every stored value (a scalar, or one element of
/// a collection property).
///
/// `prop_id` caches the numeric property id once known, so re-serialization
/// does not depend on the dictionary. `eid` holds either a store-assigned
/// element id or one of the [`EID_COLLECTION`] / [`EID_FIRST_ELEMENT`] /
/// [`EID_LAST_ELEMENT`] sentinels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMeta {
    pub prop_id: Option<u32>,
    pub wtype: WireType,
    pub op: OpCode,
    pub eid: u32,
    pub flags: u32,
}

impl Default for ValueMeta {
    fn default() -> Self {
        Self {
            prop_id: None,
            wtype: WireType::Any,
            op: OpCode::Set,
            eid: EID_COLLECTION,
            flags: 0,
        }
    }
}

impl ValueMeta {
    /// Metadata for a collection operation: untyped value, explicit op and
    /// element-id anchor.
    pub fn coll_op(op: OpCode, eid: u32) -> Self {
        Self { op, eid, ..Self::default() }
    }

    /// Metadata carrying a pinned wire type.
    pub fn typed(wtype: WireType) -> Self {
        Self { wtype, ..Self::default() }
    }

    /// Whether `eid` still holds a sentinel instead of a store-assigned id.
    pub fn is_placeholder_eid(&self) -> bool {
        matches!(
            self.eid,
            EID_COLLECTION | EID_LAST_ELEMENT | EID_FIRST_ELEMENT
        )
    }
}

impl fmt::Display for ValueMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{:?}:{}", self.op, self.wtype, self.eid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_type_tag_roundtrip() {
        for wt in [
            WireType::Any,
            WireType::Int,
            WireType::UInt,
            WireType::Int64,
            WireType::UInt64,
            WireType::Float,
            WireType::Double,
            WireType::Bool,
            WireType::DateTime,
            WireType::UriId,
            WireType::String,
            WireType::Bstr,
            WireType::Url,
            WireType::RefId,
            WireType::RefIdProp,
            WireType::RefIdElt,
            WireType::Array,
        ] {
            assert_eq!(WireType::try_from(wt.tag()).unwrap(), wt);
        }
    }

    #[test]
    fn wire_type_rejects_unknown_tags() {
        assert_eq!(WireType::try_from(5), Err(TypeError::UnknownWireType(5)));
        assert_eq!(WireType::try_from(99), Err(TypeError::UnknownWireType(99)));
    }

    #[test]
    fn op_code_roundtrip() {
        for op in [
            OpCode::Set,
            OpCode::Add,
            OpCode::AddBefore,
            OpCode::Move,
            OpCode::MoveBefore,
            OpCode::Delete,
        ] {
            assert_eq!(OpCode::try_from(op.code()).unwrap(), op);
        }
        assert!(OpCode::try_from(42).is_err());
    }

    #[test]
    fn inserting_ops() {
        assert!(OpCode::Add.inserts_element());
        assert!(OpCode::AddBefore.inserts_element());
        assert!(!OpCode::Set.inserts_element());
        assert!(!OpCode::Move.inserts_element());
        assert!(!OpCode::Delete.inserts_element());
    }

    #[test]
    fn default_meta_is_untyped_set() {
        let meta = ValueMeta::default();
        assert_eq!(meta.wtype, WireType::Any);
        assert_eq!(meta.op, OpCode::Set);
        assert_eq!(meta.eid, EID_COLLECTION);
        assert!(meta.is_placeholder_eid());
    }

    #[test]
    fn assigned_eid_is_not_placeholder() {
        let meta = ValueMeta { eid: 12, ..ValueMeta::default() };
        assert!(!meta.is_placeholder_eid());
        for sentinel in [EID_COLLECTION, EID_FIRST_ELEMENT, EID_LAST_ELEMENT] {
            let meta = ValueMeta { eid: sentinel, ..ValueMeta::default() };
            assert!(meta.is_placeholder_eid());
        }
    }

    #[test]
    fn sentinels_are_distinct_and_high() {
        assert!(EID_FIRST_ELEMENT < EID_LAST_ELEMENT);
        assert!(EID_LAST_ELEMENT < EID_COLLECTION);
        assert_eq!(EID_COLLECTION, u32::MAX);
    }
}
