use crate::error::EngineError;
use crate::types::{KeyAction, KeyId, KeyTransition};
use std::sync::Arc;
use tracing::debug;

/// Magic number carried in `dwExtraInfo` to identify our own injected events.
pub const INJECTED_EXTRA_INFO: usize = 0x4B56_4554;

/// Callback the platform hook invokes for every physical key transition.
pub type HookHandler = Arc<dyn Fn(KeyTransition) -> KeyAction + Send + Sync>;

/// Native input layer: a global keyboard hook plus a tagged synthetic-input sink.
///
/// The engine only talks to this trait, so hosts pick the real Windows
/// implementation or [`NullBackend`] once at startup.
pub trait InputBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Installs the global hook. Every physical transition is routed to `handler`
    /// until [`InputBackend::uninstall_hook`] is called.
    fn install_hook(&self, handler: HookHandler) -> Result<(), EngineError>;

    /// Asks the hook to stop delivering events and returns without waiting.
    /// An error leaves the hook installed so the call can be retried.
    fn uninstall_hook(&self) -> Result<(), EngineError>;

    /// Blocks until every hook thread signalled by [`InputBackend::uninstall_hook`]
    /// has exited. Must return immediately when called from a hook thread.
    fn wait_unhooked(&self) {}

    /// Queues exactly one tagged key-down. `false` means the event was lost.
    fn send_down(&self, key: KeyId) -> bool;

    /// Queues exactly one tagged key-up. `false` means the event was lost.
    fn send_up(&self, key: KeyId) -> bool;
}

/// Backend for platforms without a supported hook. Never delivers events and
/// reports every injection as successful.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl InputBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn install_hook(&self, _handler: HookHandler) -> Result<(), EngineError> {
        debug!("NullBackend: hook install is a no-op on this platform");
        Ok(())
    }

    fn uninstall_hook(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn send_down(&self, key: KeyId) -> bool {
        debug!("NullBackend: simulated key down {}", key);
        true
    }

    fn send_up(&self, key: KeyId) -> bool {
        debug!("NullBackend: simulated key up {}", key);
        true
    }
}

/// The backend for the platform this binary was built for.
pub fn native_backend() -> Arc<dyn InputBackend> {
    #[cfg(windows)]
    {
        Arc::new(crate::keyboard_hook::WindowsBackend::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(NullBackend)
    }
}
