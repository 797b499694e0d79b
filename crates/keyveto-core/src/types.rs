use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Instant;

use crate::backend::INJECTED_EXTRA_INFO;

/// Windows virtual-key code identifying one physical key.
///
/// Serializes as the numeric code. Deserializes from either the code or a key
/// name understood by [`crate::keys::name_to_vk`] (`"W"`, `"Left"`, `"0x57"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct KeyId(pub u16);

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(u16),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(vk) => Ok(KeyId(vk)),
            Repr::Name(name) => KeyId::from_name(&name)
                .ok_or_else(|| de::Error::custom(format!("unknown key name {:?}", name))),
        }
    }
}

impl KeyId {
    pub const W: KeyId = KeyId(0x57);
    pub const A: KeyId = KeyId(0x41);
    pub const S: KeyId = KeyId(0x53);
    pub const D: KeyId = KeyId(0x44);
    pub const LEFT: KeyId = KeyId(0x25);
    pub const UP: KeyId = KeyId(0x26);
    pub const RIGHT: KeyId = KeyId(0x27);
    pub const DOWN: KeyId = KeyId(0x28);

    pub const fn new(vk: u16) -> Self {
        Self(vk)
    }

    pub const fn vk(self) -> u16 {
        self.0
    }

    pub fn name(self) -> Option<&'static str> {
        crate::keys::vk_to_name(self.0)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        crate::keys::name_to_vk(name).map(Self)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "VK_{:02X}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEdge {
    Down,
    Up,
}

/// One physical key transition as delivered by the platform hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub key: KeyId,
    pub edge: KeyEdge,
    /// Opaque value the OS hands back from the injecting call (`dwExtraInfo`).
    pub extra_info: usize,
}

impl KeyTransition {
    pub const fn new(key: KeyId, edge: KeyEdge, extra_info: usize) -> Self {
        Self {
            key,
            edge,
            extra_info,
        }
    }

    pub const fn down(key: KeyId) -> Self {
        Self::new(key, KeyEdge::Down, 0)
    }

    pub const fn up(key: KeyId) -> Self {
        Self::new(key, KeyEdge::Up, 0)
    }

    /// Whether this transition is the echo of one of our own synthetic events.
    pub fn is_injected(&self) -> bool {
        self.extra_info == INJECTED_EXTRA_INFO
    }
}

/// What the hook should do with the physical event it just reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Pass,
    /// Swallow the physical event; the engine re-synthesizes the managed keys.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyGroup {
    pub keys: Vec<KeyId>,
    #[serde(default)]
    pub allow_simultaneous: bool,
}

impl KeyGroup {
    pub fn exclusive(keys: impl IntoIterator<Item = KeyId>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            allow_simultaneous: false,
        }
    }

    pub fn simultaneous(keys: impl IntoIterator<Item = KeyId>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            allow_simultaneous: true,
        }
    }

    pub fn contains(&self, key: KeyId) -> bool {
        self.keys.contains(&key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyState {
    pub physically_pressed: bool,
    pub logically_pressed: bool,
    pub last_event: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub enabled: bool,
    pub groups: Vec<KeyGroup>,
    pub enabled_keys: BTreeSet<KeyId>,
}

impl EngineConfig {
    /// First group in declaration order that lists `key`.
    pub fn group_of(&self, key: KeyId) -> Option<&KeyGroup> {
        self.groups.iter().find(|g| g.contains(key))
    }

    pub fn is_enabled_key(&self, key: KeyId) -> bool {
        self.enabled_keys.contains(&key)
    }
}

/// Partial update merged into the current [`EngineConfig`]; `None` keeps the field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfigPatch {
    pub enabled: Option<bool>,
    pub groups: Option<Vec<KeyGroup>>,
    pub enabled_keys: Option<BTreeSet<KeyId>>,
}

impl EngineConfigPatch {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn groups(mut self, groups: Vec<KeyGroup>) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn enabled_keys(mut self, keys: impl IntoIterator<Item = KeyId>) -> Self {
        self.enabled_keys = Some(keys.into_iter().collect());
        self
    }

    /// Rejects groups that are empty or list the same key twice.
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        let Some(groups) = &self.groups else {
            return Ok(());
        };
        for (i, group) in groups.iter().enumerate() {
            if group.keys.is_empty() {
                return Err(crate::error::EngineError::ConfigValidation(format!(
                    "group {} has no keys",
                    i
                )));
            }
            let mut seen = HashSet::new();
            for key in &group.keys {
                if !seen.insert(*key) {
                    return Err(crate::error::EngineError::ConfigValidation(format!(
                        "key {} appears twice in group {}",
                        key, i
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub total_events_processed: u64,
    pub key_down_events: u64,
    pub key_up_events: u64,
    pub simulated_events: u64,
    pub conflicts_resolved: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub running: bool,
    pub active_keys: Vec<KeyId>,
    pub diagnostics: Diagnostics,
}
