use crate::engine::Engine;
use crate::window::{ForegroundProcess, WindowMonitor, WindowSnapshot};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// External restrictions on when the engine may run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivationConditions {
    /// Process name (`game.exe`) or full image path. Blank means unrestricted.
    pub target_process: Option<String>,
    pub fullscreen_only: bool,
}

impl ActivationConditions {
    pub fn target(&self) -> Option<&str> {
        self.target_process
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Case-insensitive match on exact name, exact path, or a path suffix that
/// starts at a separator.
pub fn process_matches(target: &str, process: &ForegroundProcess) -> bool {
    let target = target.trim().to_lowercase();
    if target.is_empty() {
        return false;
    }
    let name = process.name.to_lowercase();
    let path = process.path.to_lowercase();
    if name == target || path == target {
        return true;
    }
    path.strip_suffix(target.as_str())
        .is_some_and(|prefix| prefix.ends_with(['\\', '/']))
}

pub fn should_run(
    user_enabled: bool,
    conditions: &ActivationConditions,
    snapshot: &WindowSnapshot,
) -> bool {
    if !user_enabled {
        return false;
    }
    if let Some(target) = conditions.target() {
        match &snapshot.process {
            Some(process) if process_matches(target, process) => {}
            _ => return false,
        }
    }
    !conditions.fullscreen_only || snapshot.is_fullscreen
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GateState {
    Stopped,
    Running,
    /// Should run, but the last start attempt failed. Retried on the next
    /// reconciliation.
    Waiting,
}

struct GateInner {
    user_enabled: bool,
    conditions: ActivationConditions,
    snapshot: Arc<WindowSnapshot>,
    generation: u64,
    state: GateState,
}

/// Level-triggered reconciler that starts or stops the engine so that it
/// runs exactly when [`should_run`] holds.
pub struct ActivationGate {
    engine: Arc<Engine>,
    inner: Mutex<GateInner>,
}

impl ActivationGate {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            inner: Mutex::new(GateInner {
                user_enabled: false,
                conditions: ActivationConditions::default(),
                snapshot: Arc::new(WindowSnapshot::default()),
                generation: 0,
                state: GateState::Stopped,
            }),
        }
    }

    pub fn state(&self) -> GateState {
        self.inner.lock().state
    }

    pub fn conditions(&self) -> ActivationConditions {
        self.inner.lock().conditions.clone()
    }

    pub fn set_user_enabled(&self, enabled: bool) -> GateState {
        self.update(|inner| inner.user_enabled = enabled)
    }

    pub fn set_conditions(&self, conditions: ActivationConditions) -> GateState {
        self.update(|inner| inner.conditions = conditions)
    }

    pub fn on_window_change(&self, snapshot: &WindowSnapshot) -> GateState {
        let snapshot = Arc::new(snapshot.clone());
        self.update(|inner| inner.snapshot = snapshot)
    }

    /// Seeds the gate with the monitor's current sample and follows its changes.
    pub fn attach(self: &Arc<Self>, monitor: &WindowMonitor) {
        let weak: Weak<Self> = Arc::downgrade(self);
        monitor.on_change(move |snapshot| {
            if let Some(gate) = weak.upgrade() {
                gate.on_window_change(snapshot);
            }
        });
        let current = monitor.current();
        self.on_window_change(&current);
    }

    fn update(&self, apply: impl FnOnce(&mut GateInner)) -> GateState {
        {
            let mut inner = self.inner.lock();
            apply(&mut inner);
            inner.generation += 1;
        }
        self.reconcile()
    }

    /// Re-evaluates the predicate and drives the engine. No gate lock is held
    /// while the engine runs, so engine listeners may call back in.
    pub fn reconcile(&self) -> GateState {
        loop {
            let (generation, desired) = {
                let inner = self.inner.lock();
                (
                    inner.generation,
                    should_run(inner.user_enabled, &inner.conditions, &inner.snapshot),
                )
            };

            let state = self.drive(desired);

            let mut inner = self.inner.lock();
            if inner.generation == generation {
                if inner.state != state {
                    info!("Gate: {:?} -> {:?}", inner.state, state);
                }
                inner.state = state;
                return state;
            }
            debug!("Gate inputs changed during reconcile; re-evaluating");
        }
    }

    fn drive(&self, desired: bool) -> GateState {
        if desired {
            match self.engine.start() {
                Ok(()) => GateState::Running,
                Err(e) => {
                    warn!("Gate could not start engine: {}", e);
                    GateState::Waiting
                }
            }
        } else {
            if let Err(e) = self.engine.stop() {
                warn!("Gate could not stop engine: {}", e);
            }
            if self.engine.is_running() {
                GateState::Running
            } else {
                GateState::Stopped
            }
        }
    }
}
