//! Well-known store properties and the application property-id space.
//!
//! The store reserves low numeric ids for its special properties; those ids
//! never travel through the per-message dictionary. Application property
//! names are assigned ids from the private space starting at
//! [`FIRST_APP_PROP_ID`], scoped to the lifetime of the outermost
//! transaction.

/// First property id the driver may assign to an application property name.
/// Everything below is reserved for the store's well-known properties.
pub const FIRST_APP_PROP_ID: u32 = 0x100;

/// Well-known store property ids and names.
pub mod well_known {
    pub const PIN_ID: u32 = 1;
    pub const DOCUMENT: u32 = 2;
    pub const PARENT: u32 = 3;
    pub const VALUE: u32 = 4;
    pub const CREATED: u32 = 5;
    pub const CREATED_BY: u32 = 6;
    pub const UPDATED: u32 = 7;
    pub const UPDATED_BY: u32 = 8;
    pub const ACL: u32 = 9;
    pub const URI: u32 = 10;
    pub const STAMP: u32 = 11;
    pub const CLASS_ID: u32 = 12;

    /// Id/name pairs for every well-known property.
    pub const TABLE: &[(u32, &str)] = &[
        (PIN_ID, "pin:id"),
        (DOCUMENT, "pin:document"),
        (PARENT, "pin:parent"),
        (VALUE, "pin:value"),
        (CREATED, "pin:created"),
        (CREATED_BY, "pin:createdBy"),
        (UPDATED, "pin:updated"),
        (UPDATED_BY, "pin:updatedBy"),
        (ACL, "pin:ACL"),
        (URI, "pin:URI"),
        (STAMP, "pin:stamp"),
        (CLASS_ID, "pin:classID"),
    ];

    /// Resolve a well-known property id to its name.
    pub fn name_of(id: u32) -> Option<&'static str> {
        TABLE.iter().find(|(i, _)| *i == id).map(|(_, n)| *n)
    }

    /// Resolve a well-known property name to its id.
    pub fn id_of(name: &str) -> Option<u32> {
        TABLE.iter().find(|(_, n)| *n == name).map(|(i, _)| *i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_space_is_above_well_known() {
        for (id, _) in well_known::TABLE {
            assert!(*id < FIRST_APP_PROP_ID);
        }
    }

    #[test]
    fn lookup_both_ways() {
        assert_eq!(well_known::name_of(well_known::PIN_ID), Some("pin:id"));
        assert_eq!(well_known::id_of("pin:created"), Some(well_known::CREATED));
        assert_eq!(well_known::name_of(0xFFFF), None);
        assert_eq!(well_known::id_of("nonsense"), None);
    }

    #[test]
    fn ids_and_names_are_unique() {
        for (i, (id, name)) in well_known::TABLE.iter().enumerate() {
            for (other_id, other_name) in &well_known::TABLE[i + 1..] {
                assert_ne!(id, other_id);
                assert_ne!(name, other_name);
            }
        }
    }
}
