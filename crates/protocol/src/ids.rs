//! Identifier newtypes for server-owned records.
//!
//! The server is free to emit identifiers as JSON strings or JSON integers.
//! Both forms are accepted on the way in and normalized to strings, so the
//! rest of the client never has to care which one it got.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
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
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match RawId::deserialize(deserializer)? {
                    RawId::Text(s) if s.is_empty() => {
                        Err(serde::de::Error::custom("identifier must not be empty"))
                    }
                    RawId::Text(s) => Ok(Self(s)),
                    RawId::Int(n) => Ok(Self(n.to_string())),
                }
            }
        }
    };
}

string_id!(
    /// Identifier of a stored file.
    FileId
);

string_id!(
    /// Identifier of a folder.
    FolderId
);

string_id!(
    /// Identifier of an account.
    UserId
);
