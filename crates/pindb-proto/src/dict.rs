use std::collections::HashMap;

use pindb_types::{well_known, FIRST_APP_PROP_ID};

use crate::stream::WireStream;

/// Accumulated name→id mappings for application property names, scoped to
/// the lifetime of the outermost transaction.
///
/// Ids are allocated from the private space starting at
/// [`FIRST_APP_PROP_ID`]; well-known store properties resolve without ever
/// entering the dictionary (the store already knows them).
#[derive(Debug, Default)]
pub struct PropertyDictionary {
    map: HashMap<String, u32>,
}

impl PropertyDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a property name, assigning a fresh id when the name is not
    /// yet known. Returns `(id, newly_added)`; `newly_added` is `true` only
    /// when a dictionary update must be sent ahead of the value using it.
    pub fn intern(&mut self, name: &str) -> (u32, bool) {
        if let Some(id) = well_known::id_of(name) {
            return (id, false);
        }
        if let Some(id) = self.map.get(name) {
            return (*id, false);
        }
        let id = FIRST_APP_PROP_ID + self.map.len() as u32;
        self.map.insert(name.to_string(), id);
        (id, true)
    }

    /// Resolve without assigning.
    pub fn resolve(&self, name: &str) -> Option<u32> {
        well_known::id_of(name).or_else(|| self.map.get(name).copied())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Forget all accumulated mappings. Called when transaction nesting
    /// returns to zero.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Resolution context for a response stream: id→name over the stream's own
/// dictionary plus the well-known table.
#[derive(Debug)]
pub struct ReadContext {
    id2name: HashMap<u32, String>,
    name2id: HashMap<String, u32>,
}

impl ReadContext {
    pub fn new(stream: &WireStream) -> Self {
        let mut id2name = HashMap::new();
        let mut name2id = HashMap::new();
        for (id, name) in well_known::TABLE {
            id2name.insert(*id, (*name).to_string());
            name2id.insert((*name).to_string(), *id);
        }
        for mapping in &stream.properties {
            id2name.insert(mapping.id, mapping.name.clone());
            name2id.insert(mapping.name.clone(), mapping.id);
        }
        Self { id2name, name2id }
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.id2name.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.name2id.get(name).copied()
    }
}
