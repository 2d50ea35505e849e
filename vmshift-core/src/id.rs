use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Cluster-unique identifier of a virtual machine.
///
/// VM names may legitimately collide across clusters; the ID must not.
/// It is the sole cross-host correlation key during a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmId(pub Uuid);

impl VmId {
    /// Creates a new random `VmId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner `Uuid`.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for VmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for VmId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for VmId {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.parse::<Uuid>()
            .map(Self)
            .map_err(|e| CoreError::InvalidVmId { raw: raw.to_owned(), reason: e.to_string() })
    }
}

/// A hypervisor host name, normalized to lowercase on construction.
///
/// Windows host names are case-insensitive; normalizing once at the
/// boundary lets the rest of the engine compare with plain `==`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[non_exhaustive]
pub struct HostName(String);

impl HostName {
    /// Creates a `HostName` from any string-like value, lowercasing it.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    /// Returns the normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for HostName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// Deserialization must go through `new` so externally supplied names are
// normalized too.
impl<'de> Deserialize<'de> for HostName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}
