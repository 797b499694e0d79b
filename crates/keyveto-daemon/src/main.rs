mod shutdown;

use anyhow::Context;
use crossbeam_channel::Receiver;
use keyveto_core::bridge::{BridgeEvent, ConfigBridge, Settings};
use keyveto_core::engine::Engine;
use keyveto_core::gate::ActivationGate;
use keyveto_core::window::{native_probe, WindowMonitor};
use keyveto_core::native_backend;
use shutdown::ShutdownSignal;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing_subscriber::EnvFilter;

const RELOAD_CHECK: Duration = Duration::from_secs(2);

fn get_settings_path() -> Option<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Some(PathBuf::from(arg));
    }
    let base = if cfg!(windows) {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
    };
    base.map(|dir| dir.join("keyveto").join("settings.json"))
}

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        save_settings(path, &settings)?;
        tracing::info!("Wrote default settings to {}", path.display());
        return Ok(settings);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Settings::from_json(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn save_settings(path: &Path, settings: &Settings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, settings.to_json()?)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Logs bridge events and reloads the settings file when it changes, until
/// `shutdown` fires.
fn serve(
    bridge: &ConfigBridge,
    events: &Receiver<BridgeEvent>,
    shutdown: &Receiver<()>,
    path: &Path,
) {
    let mut last_modified = modified(path);
    loop {
        crossbeam_channel::select! {
            recv(shutdown) -> _ => {
                tracing::info!("Shutdown requested");
                break;
            }
            recv(events) -> event => match event {
                Ok(BridgeEvent::Status(status)) => {
                    tracing::debug!(
                        running = status.running,
                        active = ?status.active_keys,
                        conflicts = status.diagnostics.conflicts_resolved,
                        "status"
                    );
                    if let Some(err) = &status.diagnostics.last_error {
                        tracing::trace!("last error: {}", err);
                    }
                }
                Ok(BridgeEvent::Warning(msg)) => tracing::warn!("{}", msg),
                Err(_) => break,
            },
            default(RELOAD_CHECK) => {
                let current = modified(path);
                if current != last_modified {
                    last_modified = current;
                    match load_settings(path).and_then(|s| Ok(bridge.apply_settings(&s)?)) {
                        Ok(state) => tracing::info!("Reloaded settings (gate {:?})", state),
                        Err(e) => tracing::error!("Failed to reload settings: {:#}", e),
                    }
                }
            }
        }
    }
}

/// Stops polling, then stops the engine so every held key is released.
fn teardown(monitor: &WindowMonitor, engine: &Engine) {
    monitor.cleanup();
    engine.cleanup();
    tracing::info!("Shut down cleanly");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = get_settings_path().context("no settings path: pass one or set APPDATA/HOME")?;
    let settings = load_settings(&path)?;
    let shutdown = ShutdownSignal::spawn()?;

    let backend = native_backend();
    tracing::info!("Using {} input backend", backend.name());

    let engine = Arc::new(Engine::new(backend));
    let gate = Arc::new(ActivationGate::new(engine.clone()));
    let monitor = Arc::new(WindowMonitor::new(native_probe()));
    gate.attach(&monitor);
    let (bridge, events) = ConfigBridge::new(engine.clone(), gate.clone());

    let applied = bridge
        .apply_settings(&settings)
        .context("failed to apply settings");
    if applied.is_ok() {
        monitor.start();
        serve(&bridge, &events, &shutdown, &path);
    }
    teardown(&monitor, &engine);
    applied.map(|_| ())
}
