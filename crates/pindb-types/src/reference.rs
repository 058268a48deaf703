use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pid::Pid;

/// Reference to a PIN, to one of its properties, or to one element of an
/// ordered collection property.
///
/// The three shapes have distinct textual forms, matching the fragments the
/// store's query language accepts:
///
/// - `@<hex>` — a whole PIN
/// - `@<hex>.prop` — a property of a PIN
/// - `@<hex>.prop[eid]` — one collection element, addressed by element id
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pid: Pid,
    property: Option<String>,
    eid: Option<u32>,
}

impl PinRef {
    /// Reference a whole PIN.
    pub fn entity(pid: Pid) -> Self {
        Self { pid, property: None, eid: None }
    }

    /// Reference a property of a PIN.
    pub fn property(pid: Pid, property: impl Into<String>) -> Self {
        Self { pid, property: Some(property.into()), eid: None }
    }

    /// Reference one element of a collection property.
    pub fn element(pid: Pid, property: impl Into<String>, eid: u32) -> Self {
        Self { pid, property: Some(property.into()), eid: Some(eid) }
    }

    /// The referenced PIN's identifier.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The referenced property name, if any.
    pub fn property_name(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// The referenced element id, if any.
    pub fn eid(&self) -> Option<u32> {
        self.eid
    }
}

impl From<Pid> for PinRef {
    fn from(pid: Pid) -> Self {
        Self::entity(pid)
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.property, self.eid) {
            (Some(prop), Some(eid)) => write!(f, "{}.{prop}[{eid}]", self.pid),
            (Some(prop), None) => write!(f, "{}.{prop}", self.pid),
            _ => write!(f, "{}", self.pid),
        }
    }
}
