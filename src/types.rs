//! Identifier types shared by the coordinator.
//!
//! All identifiers are opaque strings minted by the generation service (or by the
//! document store for documents and sections). Newtypes keep them from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identity of a document. Documents are owned elsewhere; the coordinator only references them.
    DocumentId
);
string_id!(
    /// Identity of an execution (a document version).
    ExecutionId
);
string_id!(
    /// Identity of a section definition within a document.
    SectionId
);
string_id!(
    /// Identity of one section's generated output inside one execution.
    SectionOutputId
);
string_id!(
    /// Job handle returned by the generation service when it accepts work.
    JobId
);
