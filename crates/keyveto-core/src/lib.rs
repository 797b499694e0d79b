pub mod backend;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod gate;
#[cfg(windows)]
pub mod keyboard_hook;
pub mod keys;
pub mod types;
pub mod window;

pub use backend::{native_backend, InputBackend, NullBackend, INJECTED_EXTRA_INFO};
pub use bridge::{BridgeEvent, ConfigBridge, Settings};
pub use engine::{Engine, Subscription};
pub use error::{BridgeError, EngineError};
pub use gate::{ActivationConditions, ActivationGate, GateState};
pub use types::{
    Diagnostics, EngineConfig, EngineConfigPatch, EngineStatus, KeyAction, KeyEdge, KeyGroup,
    KeyId, KeyState, KeyTransition,
};
pub use window::{WindowMonitor, WindowSnapshot};
