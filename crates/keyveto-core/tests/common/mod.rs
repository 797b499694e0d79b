#![allow(dead_code)]

use keyveto_core::backend::{HookHandler, InputBackend, INJECTED_EXTRA_INFO};
use keyveto_core::engine::Engine;
use keyveto_core::error::EngineError;
use keyveto_core::types::{EngineConfig, KeyAction, KeyEdge, KeyGroup, KeyId, KeyTransition};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    Down(KeyId),
    Up(KeyId),
}

/// Stands in for the OS: keeps the installed hook handler so tests deliver
/// events through the same boundary, records every synthetic send, and queues
/// the tagged echo the OS would later report back to the hook.
#[derive(Default)]
pub struct RecordingBackend {
    handler: Mutex<Option<HookHandler>>,
    sent: Mutex<Vec<Sent>>,
    echoes: Mutex<VecDeque<KeyTransition>>,
    installs: AtomicUsize,
    fail_install: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deliver(&self, t: KeyTransition) -> Option<KeyAction> {
        let handler = self.handler.lock().clone();
        handler.map(|h| h(t))
    }

    pub fn press(&self, key: KeyId) -> Option<KeyAction> {
        self.deliver(KeyTransition::down(key))
    }

    pub fn release(&self, key: KeyId) -> Option<KeyAction> {
        self.deliver(KeyTransition::up(key))
    }

    /// Delivers queued echoes of our own injections, like the OS would after
    /// the hook callback returns.
    pub fn pump_echoes(&self) -> Vec<KeyAction> {
        let pending: Vec<KeyTransition> = self.echoes.lock().drain(..).collect();
        pending.into_iter().filter_map(|t| self.deliver(t)).collect()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn is_hooked(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn set_fail_install(&self, fail: bool) {
        self.fail_install.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn send(&self, key: KeyId, edge: KeyEdge) -> bool {
        if self.fail_sends.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(match edge {
            KeyEdge::Down => Sent::Down(key),
            KeyEdge::Up => Sent::Up(key),
        });
        self.echoes
            .lock()
            .push_back(KeyTransition::new(key, edge, INJECTED_EXTRA_INFO));
        true
    }
}

impl InputBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn install_hook(&self, handler: HookHandler) -> Result<(), EngineError> {
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(EngineError::HookActivation("hook refused".to_string()));
        }
        self.installs.fetch_add(1, Ordering::SeqCst);
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    fn uninstall_hook(&self) -> Result<(), EngineError> {
        *self.handler.lock() = None;
        Ok(())
    }

    fn send_down(&self, key: KeyId) -> bool {
        self.send(key, KeyEdge::Down)
    }

    fn send_up(&self, key: KeyId) -> bool {
        self.send(key, KeyEdge::Up)
    }
}

struct HookWorker {
    events: Sender<(KeyTransition, Sender<KeyAction>)>,
    join: JoinHandle<()>,
}

/// Runs the hook handler on a dedicated dispatch thread and joins it on
/// unhook, the way the Windows backend runs its message loop.
#[derive(Default)]
pub struct ThreadedBackend {
    live: Mutex<Option<HookWorker>>,
    retired: Mutex<Vec<HookWorker>>,
    sent: Mutex<Vec<Sent>>,
    spawned: AtomicUsize,
    fail_unhook: AtomicBool,
}

impl ThreadedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hands `t` to the dispatch thread and waits for its verdict.
    pub fn deliver(&self, t: KeyTransition) -> Option<KeyAction> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let queued = self
            .live
            .lock()
            .as_ref()
            .is_some_and(|w| w.events.send((t, reply_tx)).is_ok());
        if !queued {
            return None;
        }
        reply_rx.recv().ok()
    }

    pub fn press(&self, key: KeyId) -> Option<KeyAction> {
        self.deliver(KeyTransition::down(key))
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Dispatch threads that are installed or signalled but not yet joined.
    pub fn pending_threads(&self) -> usize {
        usize::from(self.live.lock().is_some()) + self.retired.lock().len()
    }

    pub fn set_fail_unhook(&self, fail: bool) {
        self.fail_unhook.store(fail, Ordering::SeqCst);
    }

    fn thread_id(worker: &HookWorker) -> ThreadId {
        worker.join.thread().id()
    }
}

impl InputBackend for ThreadedBackend {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn install_hook(&self, handler: HookHandler) -> Result<(), EngineError> {
        let mut live = self.live.lock();
        if live.is_some() {
            return Err(EngineError::HookActivation("already installed".to_string()));
        }
        let (events, inbox) =
            crossbeam_channel::unbounded::<(KeyTransition, Sender<KeyAction>)>();
        let join = std::thread::Builder::new()
            .name("test-hook".to_string())
            .spawn(move || {
                for (t, reply) in inbox.iter() {
                    let _ = reply.send(handler(t));
                }
            })
            .map_err(|e| EngineError::HookActivation(e.to_string()))?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        *live = Some(HookWorker { events, join });
        Ok(())
    }

    fn uninstall_hook(&self) -> Result<(), EngineError> {
        if self.fail_unhook.load(Ordering::SeqCst) {
            return Err(EngineError::HookDeactivation("post failed".to_string()));
        }
        // Dropping the sender ends the dispatch loop once it drains.
        if let Some(worker) = self.live.lock().take() {
            self.retired.lock().push(worker);
        }
        Ok(())
    }

    fn wait_unhooked(&self) {
        let current = std::thread::current().id();
        let retired = std::mem::take(&mut *self.retired.lock());
        for worker in retired {
            if Self::thread_id(&worker) == current {
                continue;
            }
            let HookWorker { events, join } = worker;
            drop(events);
            join.join().expect("dispatch thread panicked");
        }
    }

    fn send_down(&self, key: KeyId) -> bool {
        self.sent.lock().push(Sent::Down(key));
        true
    }

    fn send_up(&self, key: KeyId) -> bool {
        self.sent.lock().push(Sent::Up(key));
        true
    }
}

pub fn config(groups: Vec<KeyGroup>) -> EngineConfig {
    let enabled_keys = groups.iter().flat_map(|g| g.keys.iter().copied()).collect();
    EngineConfig {
        enabled: true,
        groups,
        enabled_keys,
    }
}

pub fn wasd() -> EngineConfig {
    config(vec![
        KeyGroup::exclusive([KeyId::W, KeyId::S]),
        KeyGroup::exclusive([KeyId::A, KeyId::D]),
    ])
}

/// A started engine wired to a fresh recording backend.
pub fn running(config: EngineConfig) -> (Engine, Arc<RecordingBackend>) {
    init_tracing();
    let backend = RecordingBackend::new();
    let engine = Engine::with_config(config, backend.clone()).expect("valid config");
    engine.start().expect("start");
    (engine, backend)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
