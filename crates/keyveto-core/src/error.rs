use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("failed to activate keyboard hook: {0}")]
    HookActivation(String),

    #[error("failed to deactivate keyboard hook: {0}")]
    HookDeactivation(String),

    #[error("invalid engine configuration: {0}")]
    ConfigValidation(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("keybind {keybind} in profile {profile} has no keys")]
    EmptyKeybind { profile: String, keybind: String },

    #[error("keybind {keybind} in profile {profile} has no group id")]
    MissingGroupId { profile: String, keybind: String },

    #[error("duplicate key {key} in group \"{group}\"; each key can only appear once per group")]
    DuplicateKey { group: String, key: crate::types::KeyId },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
