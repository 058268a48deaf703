use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Globally unique identifier of a persisted PIN.
///
/// A `Pid` is assigned by the store on first save; once assigned it is
/// immutable and never reused. Ordering is lexicographic on
/// `(local, ident)`. The textual form is `@<local in hex>`, the same form
/// the store's query language accepts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid {
    local: u64,
    ident: u32,
}

impl Pid {
    /// Create a `Pid` from its raw components.
    pub fn new(local: u64, ident: u32) -> Self {
        Self { local, ident }
    }

    /// Create a `Pid` in the default identity domain.
    pub fn local(local: u64) -> Self {
        Self { local, ident: 0 }
    }

    /// The store-local 64-bit id.
    pub fn local_id(&self) -> u64 {
        self.local
    }

    /// The identity domain the id was allocated in.
    pub fn ident(&self) -> u32 {
        self.ident
    }

    /// Parse from the textual form `@<hex>` (the leading `@` is optional).
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix('@').unwrap_or(s);
        if s.is_empty() {
            return Err(TypeError::InvalidIdentifier("empty identifier".into()));
        }
        let local = u64::from_str_radix(s, 16)
            .map_err(|e| TypeError::InvalidIdentifier(format!("{s:?}: {e}")))?;
        Ok(Self { local, ident: 0 })
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ident == 0 {
            write!(f, "Pid(@{:x})", self.local)
        } else {
            write!(f, "Pid(@{:x}/{})", self.local, self.ident)
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:x}", self.local)
    }
}

impl FromStr for Pid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_at_hex() {
        let pid = Pid::local(0x50006);
        assert_eq!(pid.to_string(), "@50006");
    }

    #[test]
    fn parse_roundtrip() {
        let pid = Pid::local(0xdeadbeef);
        let parsed = Pid::parse(&pid.to_string()).unwrap();
        assert_eq!(pid, parsed);
    }

    #[test]
    fn parse_accepts_bare_hex() {
        assert_eq!(Pid::parse("1a").unwrap(), Pid::local(0x1a));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Pid::parse("@").is_err());
        assert!(Pid::parse("@zzz").is_err());
        assert!(Pid::parse("").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(Pid::new(1, 9) < Pid::new(2, 0));
        assert!(Pid::new(2, 0) < Pid::new(2, 1));
    }

    #[test]
    fn serde_roundtrip() {
        let pid = Pid::new(42, 7);
        let json = serde_json::to_string(&pid).unwrap();
        let parsed: Pid = serde_json::from_str(&json).unwrap();
        assert_eq!(pid, parsed);
    }
}
