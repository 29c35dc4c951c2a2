//! VM identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Identifier the provisioning backend assigns to a deployed VM.
/// Opaque to vmfleet; only ever handed back to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct VmId(String);

impl VmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for VmId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for VmId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<VmId> for String {
    fn from(id: VmId) -> Self {
        id.0
    }
}
