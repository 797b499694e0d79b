use crate::backend::{HookHandler, InputBackend};
use crate::error::EngineError;
use crate::types::{
    Diagnostics, EngineConfig, EngineConfigPatch, EngineStatus, KeyAction, KeyEdge, KeyId,
    KeyState, KeyTransition,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

pub type StatusListener = Arc<dyn Fn(&EngineStatus) + Send + Sync>;

struct EngineState {
    config: EngineConfig,
    keys: HashMap<KeyId, KeyState>,
    diagnostics: Diagnostics,
    running: bool,
}

fn fresh_key_states(enabled: &BTreeSet<KeyId>) -> HashMap<KeyId, KeyState> {
    enabled.iter().map(|k| (*k, KeyState::default())).collect()
}

impl EngineState {
    fn new(mut config: EngineConfig) -> Self {
        // `enabled` mirrors the running flag; nothing runs until start().
        config.enabled = false;
        let keys = fresh_key_states(&config.enabled_keys);
        Self {
            config,
            keys,
            diagnostics: Diagnostics::default(),
            running: false,
        }
    }

    fn active_keys(&self) -> Vec<KeyId> {
        let mut active: Vec<KeyId> = self
            .keys
            .iter()
            .filter(|(_, s)| s.logically_pressed)
            .map(|(k, _)| *k)
            .collect();
        active.sort();
        active
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.running,
            active_keys: self.active_keys(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    fn record_send_failure(&mut self, key: KeyId, edge: KeyEdge) {
        let msg = format!("failed to send {:?} for {}", edge, key);
        warn!("{}", msg);
        self.diagnostics.last_error = Some(msg);
    }

    fn activate(&mut self, key: KeyId, backend: &dyn InputBackend) {
        if let Some(state) = self.keys.get_mut(&key) {
            state.logically_pressed = true;
        }
        if backend.send_down(key) {
            self.diagnostics.simulated_events += 1;
        } else {
            self.record_send_failure(key, KeyEdge::Down);
        }
    }

    fn deactivate(&mut self, key: KeyId, backend: &dyn InputBackend) {
        if let Some(state) = self.keys.get_mut(&key) {
            state.logically_pressed = false;
        }
        if backend.send_up(key) {
            self.diagnostics.simulated_events += 1;
        } else {
            self.record_send_failure(key, KeyEdge::Up);
        }
    }

    /// Sends a key-up for every logically held key.
    fn release_all(&mut self, backend: &dyn InputBackend) {
        for key in self.active_keys() {
            self.deactivate(key, backend);
        }
    }

    /// Returns [`KeyAction::Pass`] for an auto-repeat of the key already held.
    fn on_key_down(&mut self, key: KeyId, backend: &dyn InputBackend) -> KeyAction {
        self.diagnostics.key_down_events += 1;
        if let Some(state) = self.keys.get_mut(&key) {
            state.physically_pressed = true;
            state.last_event = Some(Instant::now());
        }

        let conflicting: Vec<KeyId> = match self.config.group_of(key) {
            Some(group) if !group.allow_simultaneous => group
                .keys
                .iter()
                .copied()
                .filter(|k| *k != key)
                .filter(|k| self.keys.get(k).is_some_and(|s| s.logically_pressed))
                .collect(),
            _ => Vec::new(),
        };

        for other in conflicting {
            debug!("Conflict: {} releases {}", key, other);
            self.deactivate(other, backend);
            self.diagnostics.conflicts_resolved += 1;
        }

        // Auto-repeat: the synthetic down is already out, let the OS repeat it.
        let already_active = self.keys.get(&key).is_some_and(|s| s.logically_pressed);
        if already_active {
            return KeyAction::Pass;
        }
        self.activate(key, backend);
        KeyAction::Block
    }

    fn on_key_up(&mut self, key: KeyId, backend: &dyn InputBackend) {
        self.diagnostics.key_up_events += 1;
        let was_active = match self.keys.get_mut(&key) {
            Some(state) => {
                state.physically_pressed = false;
                state.last_event = Some(Instant::now());
                state.logically_pressed
            }
            None => false,
        };
        if was_active {
            self.deactivate(key, backend);
        }
    }

    /// Returns the action for the hook and whether observable state changed.
    fn apply(&mut self, t: KeyTransition, backend: &dyn InputBackend) -> (KeyAction, bool) {
        if t.is_injected() || !self.running || !self.config.is_enabled_key(t.key) {
            return (KeyAction::Pass, false);
        }

        self.diagnostics.total_events_processed += 1;
        let action = match t.edge {
            KeyEdge::Down => self.on_key_down(t.key, backend),
            KeyEdge::Up => {
                self.on_key_up(t.key, backend);
                KeyAction::Block
            }
        };
        trace!("{:?} {} -> active {:?}", t.edge, t.key, self.active_keys());
        (action, true)
    }
}

struct Listeners {
    next_id: u64,
    entries: Vec<(u64, StatusListener)>,
}

struct Shared {
    state: Mutex<EngineState>,
    /// Serializes start/stop so hook install and uninstall never interleave.
    lifecycle: Mutex<()>,
    backend: Arc<dyn InputBackend>,
    listeners: Mutex<Listeners>,
}

impl Shared {
    fn dispatch(&self, t: KeyTransition) -> KeyAction {
        if t.is_injected() {
            return KeyAction::Pass;
        }
        let (action, status) = {
            let mut state = self.state.lock();
            let (action, changed) = state.apply(t, self.backend.as_ref());
            (action, changed.then(|| state.status()))
        };
        if let Some(status) = status {
            self.notify(&status);
        }
        action
    }

    /// Listeners run with no engine lock held, so they may call back in.
    fn notify(&self, status: &EngineStatus) {
        let listeners: Vec<StatusListener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(status);
        }
    }

    fn snapshot(&self) -> EngineStatus {
        self.state.lock().status()
    }
}

/// Conflict-resolution engine for exclusive key groups.
///
/// Physical transitions of enabled keys are swallowed and replaced by tagged
/// synthetic events so that at most one key per exclusive group is held at a
/// time, the most recently pressed one winning.
pub struct Engine {
    shared: Arc<Shared>,
}

/// Handle returned by [`Engine::on_status_change`].
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Engine {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self::build(EngineConfig::default(), backend)
    }

    /// Creates a stopped engine. `config.enabled` does not start it and reads
    /// back as `false` until [`Engine::start`] succeeds.
    pub fn with_config(
        config: EngineConfig,
        backend: Arc<dyn InputBackend>,
    ) -> Result<Self, EngineError> {
        EngineConfigPatch::default()
            .groups(config.groups.clone())
            .validate()?;
        Ok(Self::build(config, backend))
    }

    fn build(config: EngineConfig, backend: Arc<dyn InputBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new(config)),
                lifecycle: Mutex::new(()),
                backend,
                listeners: Mutex::new(Listeners {
                    next_id: 0,
                    entries: Vec::new(),
                }),
            }),
        }
    }

    pub fn start(&self) -> Result<(), EngineError> {
        let outcome = {
            let _lifecycle = self.shared.lifecycle.lock();
            if self.shared.state.lock().running {
                return Ok(());
            }

            let weak = Arc::downgrade(&self.shared);
            let handler: HookHandler = Arc::new(move |t| match weak.upgrade() {
                Some(shared) => shared.dispatch(t),
                None => KeyAction::Pass,
            });

            let installed = self.shared.backend.install_hook(handler);
            let mut state = self.shared.state.lock();
            match installed {
                Ok(()) => {
                    state.running = true;
                    state.config.enabled = true;
                    Ok(state.status())
                }
                Err(e) => {
                    warn!("Engine start failed: {}", e);
                    state.diagnostics.last_error = Some(e.to_string());
                    Err((e, state.status()))
                }
            }
        };

        // The lifecycle lock is released here, so a listener may stop us again.
        match outcome {
            Ok(status) => {
                info!("Engine started ({} backend)", self.shared.backend.name());
                self.shared.notify(&status);
                Ok(())
            }
            Err((e, status)) => {
                self.shared.notify(&status);
                Err(e)
            }
        }
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        let outcome = {
            let _lifecycle = self.shared.lifecycle.lock();
            if !self.shared.state.lock().running {
                return Ok(());
            }

            let signalled = self.shared.backend.uninstall_hook();
            let mut state = self.shared.state.lock();
            match signalled {
                Ok(()) => {
                    state.running = false;
                    state.config.enabled = false;
                    state.release_all(self.shared.backend.as_ref());
                    for key_state in state.keys.values_mut() {
                        key_state.physically_pressed = false;
                        key_state.logically_pressed = false;
                    }
                    Ok(state.status())
                }
                Err(e) => {
                    warn!("Engine stop failed: {}", e);
                    state.diagnostics.last_error = Some(e.to_string());
                    Err((e, state.status()))
                }
            }
        };

        match outcome {
            Ok(status) => {
                // Joining happens without the lifecycle lock: the hook thread may
                // be inside a listener that is itself calling stop().
                self.shared.backend.wait_unhooked();
                info!("Engine stopped");
                self.shared.notify(&status);
                Ok(())
            }
            Err((e, status)) => {
                self.shared.notify(&status);
                Err(e)
            }
        }
    }

    /// Entry point for the hook. Also usable directly to feed events in tests.
    pub fn handle_transition(&self, t: KeyTransition) -> KeyAction {
        self.shared.dispatch(t)
    }

    pub fn update_config(&self, patch: EngineConfigPatch) -> Result<(), EngineError> {
        patch.validate()?;

        let status = {
            let mut state = self.shared.state.lock();
            if let Some(groups) = patch.groups {
                state.config.groups = groups;
            }
            if let Some(keys) = patch.enabled_keys {
                if keys != state.config.enabled_keys {
                    state.release_all(self.shared.backend.as_ref());
                    state.keys = fresh_key_states(&keys);
                    state.config.enabled_keys = keys;
                }
            }
            state.status()
        };
        debug!("Config updated");
        self.shared.notify(&status);

        // start()/stop() own `config.enabled`, so a failed start leaves it false.
        match patch.enabled {
            Some(true) if !self.is_running() => self.start(),
            Some(false) if self.is_running() => self.stop(),
            _ => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn get_active_keys(&self) -> Vec<KeyId> {
        self.shared.state.lock().active_keys()
    }

    pub fn get_diagnostics(&self) -> Diagnostics {
        self.shared.state.lock().diagnostics.clone()
    }

    pub fn get_key_states(&self) -> HashMap<KeyId, KeyState> {
        self.shared.state.lock().keys.clone()
    }

    pub fn get_config(&self) -> EngineConfig {
        self.shared.state.lock().config.clone()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.snapshot()
    }

    pub fn on_status_change(
        &self,
        listener: impl Fn(&EngineStatus) + Send + Sync + 'static,
    ) -> Subscription {
        let mut listeners = self.shared.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Stops if running and drops every listener. Safe to call repeatedly.
    pub fn cleanup(&self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping engine during cleanup: {}", e);
        }
        self.shared.listeners.lock().entries.clear();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("Error stopping engine on drop: {}", e);
            }
        }
    }
}
