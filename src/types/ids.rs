//! Strongly-typed identifiers.
//!
//! Hex identifiers are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed hex ID newtype wrapper.
///
/// Generates: struct, `from_hex()`, `as_str()`, Display, Serialize, Deserialize.
/// The stored form is always lowercase hex of exactly `$bytes` bytes.
macro_rules! define_hex_id {
    ($name:ident, $bytes:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn from_hex(s: &str) -> Result<Self, &'static str> {
                if s.len() != $bytes * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(concat!(
                        stringify!($name),
                        " must be ",
                        stringify!($bytes),
                        " bytes of hex"
                    ));
                }
                Ok(Self(s.to_ascii_lowercase()))
            }

            pub fn from_bytes(bytes: &[u8; $bytes]) -> Self {
                Self(hex::encode(bytes))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = &'static str;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::from_hex(&s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_hex_id!(EventId, 32);

/// Relay-side subscription handle name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12]))
    }

    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("SubscriptionId cannot be empty");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
