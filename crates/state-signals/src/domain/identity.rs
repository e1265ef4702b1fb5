//! Publisher and responder identities.
//!
//! Both are opaque strings on the wire. Generated ids embed the process or
//! responder name followed by a random UUID, which keeps them unique per
//! instance while remaining readable in logs.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Identity of one exporter instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublisherId(String);

impl PublisherId {
    /// Generate `<process_name>-<uuid>`.
    pub fn generate(process_name: &str) -> Self {
        Self(format!("{}-{}", process_name, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of one responder instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponderId(String);

impl ResponderId {
    /// Generate `<responder_name>-<uuid>-resp`.
    pub fn generate(responder_name: &str) -> Self {
        Self(format!("{}-{}-resp", responder_name, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_id_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $ty {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $ty {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $ty {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id_impls!(PublisherId);
string_id_impls!(ResponderId);
