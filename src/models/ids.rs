//! Stable identifiers. Minted once, never reused.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! stable_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh identifier.
            pub fn mint() -> Self {
                Self(format!(concat!($prefix, "-{}"), uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

stable_id!(
    /// Identifier of a Molecule, shared by both stores.
    MoleculeId,
    "mol"
);
stable_id!(EventId, "evt");
stable_id!(VerbId, "verb");
stable_id!(VibeId, "vibe");
stable_id!(ArcInstanceId, "arc");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_ids_are_unique_and_prefixed() {
        let a = MoleculeId::mint();
        let b = MoleculeId::mint();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("mol-"));
        assert!(EventId::mint().as_str().starts_with("evt-"));
    }

    #[test]
    fn test_serializes_transparently() {
        let id = VerbId::from("verb-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"verb-1\"");
    }
}
