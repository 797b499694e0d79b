use crate::engine::{Engine, Subscription};
use crate::error::BridgeError;
use crate::gate::{ActivationConditions, ActivationGate, GateState};
use crate::types::{EngineConfig, EngineConfigPatch, EngineStatus, KeyGroup, KeyId};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_PROFILE_ID: &str = "default-wasd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keybind {
    pub id: String,
    pub keys: Vec<KeyId>,
    pub group_id: String,
    #[serde(default)]
    pub allow_simultaneous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keybinds: Vec<Keybind>,
}

impl Profile {
    /// "WASD Movement": W/S and A/D as two exclusive axes.
    pub fn default_wasd() -> Self {
        Self {
            id: DEFAULT_PROFILE_ID.to_string(),
            name: "WASD Movement".to_string(),
            description: "Resolves W/S and A/D conflicts".to_string(),
            keybinds: vec![
                Keybind {
                    id: "vertical".to_string(),
                    keys: vec![KeyId::W, KeyId::S],
                    group_id: "vertical".to_string(),
                    allow_simultaneous: false,
                },
                Keybind {
                    id: "horizontal".to_string(),
                    keys: vec![KeyId::A, KeyId::D],
                    group_id: "horizontal".to_string(),
                    allow_simultaneous: false,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enabled: bool,
    pub profiles: Vec<Profile>,
    pub active_profile_id: Option<String>,
    pub target_process: Option<String>,
    pub fullscreen_only: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            profiles: vec![Profile::default_wasd()],
            active_profile_id: Some(DEFAULT_PROFILE_ID.to_string()),
            target_process: None,
            fullscreen_only: false,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn active_profile(&self) -> Option<&Profile> {
        let id = self.active_profile_id.as_deref()?;
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn activation_conditions(&self) -> ActivationConditions {
        ActivationConditions {
            target_process: self.target_process.clone(),
            fullscreen_only: self.fullscreen_only,
        }
    }
}

pub fn validate_profile(profile: &Profile) -> Result<(), BridgeError> {
    let mut seen: HashMap<&str, HashSet<KeyId>> = HashMap::new();
    for keybind in &profile.keybinds {
        if keybind.keys.is_empty() {
            return Err(BridgeError::EmptyKeybind {
                profile: profile.id.clone(),
                keybind: keybind.id.clone(),
            });
        }
        if keybind.group_id.trim().is_empty() {
            return Err(BridgeError::MissingGroupId {
                profile: profile.id.clone(),
                keybind: keybind.id.clone(),
            });
        }
        let group = seen.entry(keybind.group_id.as_str()).or_default();
        for key in &keybind.keys {
            if !group.insert(*key) {
                return Err(BridgeError::DuplicateKey {
                    group: keybind.group_id.clone(),
                    key: *key,
                });
            }
        }
    }
    Ok(())
}

/// Flattens a profile into engine groups. Keybinds sharing a group id merge
/// into one group, in order of first appearance.
pub fn profile_groups(profile: &Profile) -> Vec<KeyGroup> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, KeyGroup> = HashMap::new();
    for keybind in &profile.keybinds {
        let group = groups.entry(keybind.group_id.as_str()).or_insert_with(|| {
            order.push(keybind.group_id.as_str());
            KeyGroup {
                keys: Vec::new(),
                allow_simultaneous: keybind.allow_simultaneous,
            }
        });
        for key in &keybind.keys {
            if !group.contains(*key) {
                group.keys.push(*key);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| groups.remove(id))
        .collect()
}

/// The engine configuration for the active profile, plus a warning when no
/// profile could be resolved and the configuration is empty.
pub fn engine_config_for(
    settings: &Settings,
) -> Result<(EngineConfig, Option<String>), BridgeError> {
    let Some(profile) = settings.active_profile() else {
        let warning = match &settings.active_profile_id {
            Some(id) => format!("active profile {:?} not found; engine is inert", id),
            None => "no active profile selected; engine is inert".to_string(),
        };
        return Ok((
            EngineConfig {
                enabled: settings.enabled,
                ..Default::default()
            },
            Some(warning),
        ));
    };

    validate_profile(profile)?;
    let groups = profile_groups(profile);
    let enabled_keys: BTreeSet<KeyId> = groups
        .iter()
        .flat_map(|g| g.keys.iter().copied())
        .collect();
    Ok((
        EngineConfig {
            enabled: settings.enabled,
            groups,
            enabled_keys,
        },
        None,
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Status(EngineStatus),
    Warning(String),
}

/// Pushes settings into the engine and gate, and republishes engine status
/// on a channel for whatever front end is attached.
pub struct ConfigBridge {
    engine: Arc<Engine>,
    gate: Arc<ActivationGate>,
    events: Sender<BridgeEvent>,
    subscription: Mutex<Option<Subscription>>,
}

impl ConfigBridge {
    pub fn new(engine: Arc<Engine>, gate: Arc<ActivationGate>) -> (Self, Receiver<BridgeEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let status_tx = tx.clone();
        let subscription = engine.on_status_change(move |status| {
            let _ = status_tx.send(BridgeEvent::Status(status.clone()));
        });
        (
            Self {
                engine,
                gate,
                events: tx,
                subscription: Mutex::new(Some(subscription)),
            },
            rx,
        )
    }

    /// Applies `settings`. A profile that fails validation is rejected and
    /// the engine keeps its previous configuration.
    pub fn apply_settings(&self, settings: &Settings) -> Result<GateState, BridgeError> {
        let (config, warning) = engine_config_for(settings)?;
        if let Some(warning) = warning {
            warn!("{}", warning);
            let _ = self.events.send(BridgeEvent::Warning(warning));
        }

        self.engine.update_config(
            EngineConfigPatch::default()
                .groups(config.groups)
                .enabled_keys(config.enabled_keys),
        )?;

        self.gate.set_conditions(settings.activation_conditions());
        let state = self.gate.set_user_enabled(settings.enabled);
        info!(
            "Applied settings (profile {:?}, gate {:?})",
            settings.active_profile_id, state
        );
        Ok(state)
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for ConfigBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::types::KeyTransition;

    fn keybind(id: &str, group: &str, keys: &[KeyId], simultaneous: bool) -> Keybind {
        Keybind {
            id: id.to_string(),
            keys: keys.to_vec(),
            group_id: group.to_string(),
            allow_simultaneous: simultaneous,
        }
    }

    fn profile(keybinds: Vec<Keybind>) -> Profile {
        Profile {
            id: "p".to_string(),
            name: "P".to_string(),
            description: String::new(),
            keybinds,
        }
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let settings = Settings::from_json("{}").expect("parse");
        assert_eq!(settings, Settings::default());
        let profile = settings.active_profile().expect("default profile");
        assert_eq!(profile.name, "WASD Movement");
    }

    #[test]
    fn test_camel_case_settings_parse() {
        let json = r#"{
            "enabled": false,
            "activeProfileId": "arrows",
            "targetProcess": "game.exe",
            "fullscreenOnly": true,
            "profiles": [{
                "id": "arrows",
                "name": "Arrows",
                "keybinds": [{"id": "v", "keys": [38, 40], "groupId": "v"}]
            }]
        }"#;
        let settings = Settings::from_json(json).expect("parse");
        assert!(!settings.enabled);
        assert!(settings.fullscreen_only);
        let (config, warning) = engine_config_for(&settings).expect("config");
        assert!(warning.is_none());
        assert_eq!(config.groups, vec![KeyGroup::exclusive([KeyId::UP, KeyId::DOWN])]);
    }

    #[test]
    fn test_keybind_keys_accept_names_and_codes() {
        let json = r#"{
            "activeProfileId": "p",
            "profiles": [{
                "id": "p",
                "name": "P",
                "keybinds": [{"id": "k", "keys": ["W", "s", "0x44", 37], "groupId": "g"}]
            }]
        }"#;
        let settings = Settings::from_json(json).expect("parse");
        let profile = settings.active_profile().expect("profile");
        assert_eq!(
            profile.keybinds[0].keys,
            vec![KeyId::W, KeyId::S, KeyId::D, KeyId::LEFT]
        );

        let unknown = json.replace("\"s\"", "\"Hyperdrive\"");
        let err = Settings::from_json(&unknown).unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
        assert!(err.to_string().contains("Hyperdrive"));
    }

    #[test]
    fn test_validate_profile_errors() {
        let empty = profile(vec![keybind("k", "g", &[], false)]);
        assert!(matches!(
            validate_profile(&empty),
            Err(BridgeError::EmptyKeybind { .. })
        ));

        let no_group = profile(vec![keybind("k", " ", &[KeyId::W], false)]);
        assert!(matches!(
            validate_profile(&no_group),
            Err(BridgeError::MissingGroupId { .. })
        ));

        // Duplicate across two keybinds of the same group.
        let dup = profile(vec![
            keybind("a", "g", &[KeyId::W, KeyId::S], false),
            keybind("b", "g", &[KeyId::W], false),
        ]);
        assert!(matches!(
            validate_profile(&dup),
            Err(BridgeError::DuplicateKey { key, .. }) if key == KeyId::W
        ));

        // Same key in different groups is allowed.
        let shared = profile(vec![
            keybind("a", "g1", &[KeyId::W, KeyId::S], false),
            keybind("b", "g2", &[KeyId::W, KeyId::A], false),
        ]);
        assert!(validate_profile(&shared).is_ok());
    }

    #[test]
    fn test_keybinds_sharing_group_merge() {
        let p = profile(vec![
            keybind("a", "move", &[KeyId::W], false),
            keybind("b", "strafe", &[KeyId::A, KeyId::D], true),
            keybind("c", "move", &[KeyId::S], true),
        ]);
        let groups = profile_groups(&p);
        assert_eq!(
            groups,
            vec![
                KeyGroup::exclusive([KeyId::W, KeyId::S]),
                KeyGroup::simultaneous([KeyId::A, KeyId::D]),
            ]
        );
    }

    #[test]
    fn test_missing_profile_is_inert_with_warning() {
        let settings = Settings {
            active_profile_id: Some("gone".to_string()),
            ..Default::default()
        };
        let (config, warning) = engine_config_for(&settings).expect("config");
        assert!(config.groups.is_empty());
        assert!(config.enabled_keys.is_empty());
        assert!(warning.is_some_and(|w| w.contains("gone")));
    }

    #[test]
    fn test_apply_settings_drives_engine_and_publishes() {
        let engine = Arc::new(Engine::new(Arc::new(NullBackend)));
        let gate = Arc::new(ActivationGate::new(engine.clone()));
        let (bridge, events) = ConfigBridge::new(engine.clone(), gate);

        let state = bridge.apply_settings(&Settings::default()).expect("apply");
        assert_eq!(state, GateState::Running);
        assert!(engine.get_config().enabled);
        assert_eq!(
            engine.get_config().enabled_keys,
            [KeyId::W, KeyId::A, KeyId::S, KeyId::D].into_iter().collect()
        );

        engine.handle_transition(KeyTransition::down(KeyId::W));
        let last = events.try_iter().last().expect("status events");
        assert_eq!(
            last,
            BridgeEvent::Status(EngineStatus {
                running: true,
                active_keys: vec![KeyId::W],
                diagnostics: engine.get_diagnostics(),
            })
        );
    }

    #[test]
    fn test_invalid_profile_leaves_engine_untouched() {
        let engine = Arc::new(Engine::new(Arc::new(NullBackend)));
        let gate = Arc::new(ActivationGate::new(engine.clone()));
        let (bridge, _events) = ConfigBridge::new(engine.clone(), gate);
        bridge.apply_settings(&Settings::default()).expect("apply");

        let mut bad = Settings::default();
        bad.profiles[0].keybinds[0].keys = vec![KeyId::W, KeyId::W];
        assert!(bridge.apply_settings(&bad).is_err());
        assert_eq!(engine.get_config().groups.len(), 2);
    }

    #[test]
    fn test_warning_event_for_missing_profile() {
        let engine = Arc::new(Engine::new(Arc::new(NullBackend)));
        let gate = Arc::new(ActivationGate::new(engine.clone()));
        let (bridge, events) = ConfigBridge::new(engine, gate);

        let settings = Settings {
            active_profile_id: None,
            ..Default::default()
        };
        bridge.apply_settings(&settings).expect("apply");
        assert!(events
            .try_iter()
            .any(|e| matches!(e, BridgeEvent::Warning(_))));
    }
}
