//! Identifier newtypes for ledger entities.
//!
//! Ids are opaque strings: entities are created by external actors (account
//! creation, scan apps, operator consoles) that assign document-style ids we
//! have no control over. `random()` produces a fresh UUIDv4-backed id for
//! code paths that mint their own (activity records, fixtures).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates an id from an externally assigned string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Creates a fresh random id.
            #[must_use]
            pub fn random() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id! {
    /// Unique identifier for a user.
    UserId
}

string_id! {
    /// Unique identifier for a visit stamp.
    StampId
}

string_id! {
    /// Unique identifier for a point grant.
    GrantId
}
