//! Capability Registry
//!
//! Which operation classes a device family supports. The answer is static
//! per family; nothing is probed at call time. Sessions consult the registry
//! before touching the driver and refuse unsupported calls with
//! [`DeviceError::UnsupportedOperation`] rather than silently doing nothing.
//!
//! | Family         | Readable | Writable | Playlist |
//! |----------------|----------|----------|----------|
//! | `Mtp`          | yes      | yes      | yes      |
//! | `MassStorage`  | yes      | yes      | no       |
//! | `AudioCd`      | yes      | no       | no       |

use crate::error::{DeviceError, Result};
use bridge_traits::device::DeviceFamily;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Readable,
    Writable,
    Playlist,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Readable,
        Capability::Writable,
        Capability::Playlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Readable => "readable",
            Capability::Writable => "writable",
            Capability::Playlist => "playlist",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::Readable => 0b001,
            Capability::Writable => 0b010,
            Capability::Playlist => 0b100,
        }
    }
}

impl FromStr for Capability {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "readable" => Ok(Capability::Readable),
            "writable" => Ok(Capability::Writable),
            "playlist" => Ok(Capability::Playlist),
            _ => Err(DeviceError::UnsupportedOperation(format!(
                "unknown capability '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A small set of [`Capability`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CapabilitySet::empty(), |set, c| set.with(c))
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let items = Vec::<Capability>::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}

/// Static family-to-capability table.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityRegistry;

impl CapabilityRegistry {
    pub fn for_family(family: DeviceFamily) -> CapabilitySet {
        match family {
            DeviceFamily::Mtp => CapabilitySet::empty()
                .with(Capability::Readable)
                .with(Capability::Writable)
                .with(Capability::Playlist),
            DeviceFamily::MassStorage => CapabilitySet::empty()
                .with(Capability::Readable)
                .with(Capability::Writable),
            DeviceFamily::AudioCd => CapabilitySet::empty().with(Capability::Readable),
        }
    }

    /// Fails with `UnsupportedOperation` unless `family` supports `capability`.
    pub fn require(family: DeviceFamily, capability: Capability) -> Result<()> {
        if Self::for_family(family).contains(capability) {
            Ok(())
        } else {
            Err(DeviceError::UnsupportedOperation(format!(
                "{} devices are not {}",
                family, capability
            )))
        }
    }
}
