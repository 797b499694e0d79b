use crate::backend::{HookHandler, InputBackend, INJECTED_EXTRA_INFO};
use crate::error::EngineError;
use crate::types::{KeyAction, KeyEdge, KeyId, KeyTransition};
use anyhow::Context;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};
use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    MapVirtualKeyW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, MAPVK_VK_TO_VSC, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HHOOK, KBDLLHOOKSTRUCT, MSG,
    PEEK_MESSAGE_REMOVE_TYPE, WH_KEYBOARD_LL, WM_KEYUP, WM_QUIT, WM_SYSKEYUP,
};

lazy_static::lazy_static! {
    /// Target of the process-wide hook procedure, tagged with the generation of
    /// the hook thread allowed to call it. Only one backend may own it.
    static ref HOOK_HANDLER: Mutex<Option<(u64, HookHandler)>> = Mutex::new(None);
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Generation of the hook installed on this thread; 0 off hook threads.
    static HOOK_GENERATION: Cell<u64> = const { Cell::new(0) };
}

struct HookThread {
    thread_id: u32,
    join: JoinHandle<()>,
}

/// WH_KEYBOARD_LL hook running on its own message-loop thread, plus
/// SendInput injection tagged with [`INJECTED_EXTRA_INFO`].
pub struct WindowsBackend {
    thread: Mutex<Option<HookThread>>,
    /// Threads sent WM_QUIT but not joined yet.
    retired: Mutex<Vec<HookThread>>,
}

impl WindowsBackend {
    pub fn new() -> Self {
        Self {
            thread: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn install_hook(&self, handler: HookHandler) -> Result<(), EngineError> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(EngineError::HookActivation(
                "keyboard hook is already installed".to_string(),
            ));
        }

        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        *HOOK_HANDLER.lock() = Some((generation, handler));

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let join = std::thread::Builder::new()
            .name("keyveto-hook".to_string())
            .spawn(move || run_hook_thread(generation, ready_tx))
            .map_err(|e| {
                *HOOK_HANDLER.lock() = None;
                EngineError::HookActivation(format!("failed to spawn hook thread: {}", e))
            })?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                *slot = Some(HookThread { thread_id, join });
                Ok(())
            }
            Ok(Err(msg)) => {
                let _ = join.join();
                *HOOK_HANDLER.lock() = None;
                Err(EngineError::HookActivation(msg))
            }
            Err(_) => {
                let _ = join.join();
                *HOOK_HANDLER.lock() = None;
                Err(EngineError::HookActivation(
                    "hook thread exited before reporting".to_string(),
                ))
            }
        }
    }

    fn uninstall_hook(&self) -> Result<(), EngineError> {
        let mut slot = self.thread.lock();
        let Some(hook_thread) = slot.as_ref() else {
            return Ok(());
        };

        // Keep the slot on failure so the next stop() reaches the same thread.
        unsafe { PostThreadMessageW(hook_thread.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
            .map_err(|e| EngineError::HookDeactivation(e.to_string()))?;

        *HOOK_HANDLER.lock() = None;
        if let Some(hook_thread) = slot.take() {
            self.retired.lock().push(hook_thread);
        }
        Ok(())
    }

    fn wait_unhooked(&self) {
        let current = unsafe { GetCurrentThreadId() };
        let retired = std::mem::take(&mut *self.retired.lock());
        for hook_thread in retired {
            // A stop requested from inside the hook callback cannot join itself;
            // the loop exits once the callback returns.
            if hook_thread.thread_id == current {
                continue;
            }
            if hook_thread.join.join().is_err() {
                warn!("Hook thread panicked during shutdown");
            }
        }
    }

    fn send_down(&self, key: KeyId) -> bool {
        inject_vk(key, false)
    }

    fn send_up(&self, key: KeyId) -> bool {
        inject_vk(key, true)
    }
}

fn install_hook() -> anyhow::Result<HHOOK> {
    info!("Installing keyboard hook...");

    // Low-level hooks require hMod to be NULL if threadId is 0.
    let hook_id =
        unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(hook_proc), HINSTANCE::default(), 0) }
            .context("SetWindowsHookExW(WH_KEYBOARD_LL) failed")?;

    if hook_id.is_invalid() {
        return Err(anyhow::anyhow!("Failed to install hook"));
    }

    info!("Keyboard hook installed successfully. Handle: {:?}", hook_id);
    Ok(hook_id)
}

/// Body of the dedicated hook thread: install, report, pump messages until WM_QUIT.
fn run_hook_thread(generation: u64, ready: Sender<Result<u32, String>>) {
    HOOK_GENERATION.with(|g| g.set(generation));
    let mut msg = MSG::default();
    unsafe {
        // Force message queue creation so PostThreadMessageW can reach us.
        let _ = PeekMessageW(&mut msg, None, 0, 0, PEEK_MESSAGE_REMOVE_TYPE(0));
    }

    let hook = match install_hook() {
        Ok(hook) => hook,
        Err(e) => {
            error!("Failed to install hook: {:#}", e);
            let _ = ready.send(Err(format!("{:#}", e)));
            return;
        }
    };

    let _ = ready.send(Ok(unsafe { GetCurrentThreadId() }));

    debug!("Starting message loop...");
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
        if let Err(e) = UnhookWindowsHookEx(hook) {
            warn!("UnhookWindowsHookEx failed: {}", e);
        }
    }
    info!("Keyboard hook uninstalled.");
}

unsafe extern "system" fn hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code < 0 {
        return CallNextHookEx(None, code, wparam, lparam);
    }

    let kbd = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
    let msg = wparam.0 as u32;
    let up = msg == WM_KEYUP || msg == WM_SYSKEYUP;

    // dwExtraInfo travels with the transition; the engine drops its own echoes.
    let transition = KeyTransition::new(
        KeyId::new(kbd.vkCode as u16),
        if up { KeyEdge::Up } else { KeyEdge::Down },
        kbd.dwExtraInfo,
    );

    // A retiring hook thread may still see events; it only passes them on.
    let generation = HOOK_GENERATION.with(Cell::get);
    let handler = match &*HOOK_HANDLER.lock() {
        Some((owner, handler)) if *owner == generation => Some(handler.clone()),
        _ => None,
    };
    let action = match handler {
        Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(transition))).unwrap_or_else(
            |_| {
                error!("Panic while handling {:?}; passing event through", transition);
                KeyAction::Pass
            },
        ),
        None => KeyAction::Pass,
    };

    match action {
        KeyAction::Pass => CallNextHookEx(None, code, wparam, lparam),
        KeyAction::Block => LRESULT(1),
    }
}

/// Keys whose scancode needs the E0 prefix.
fn is_extended_vk(vk: u16) -> bool {
    matches!(
        vk,
        0x21..=0x28 // PageUp..Down arrows
            | 0x2D
            | 0x2E // Insert, Delete
            | 0xA3
            | 0xA5 // RCtrl, RAlt
    )
}

/// Inject a single tagged key event.
fn inject_vk(key: KeyId, up: bool) -> bool {
    let vk = key.vk();
    let mut flags = KEYBD_EVENT_FLAGS(0);
    if is_extended_vk(vk) {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }
    if up {
        flags |= KEYEVENTF_KEYUP;
    }

    // Games often read scancodes, so fill both fields.
    let scan = unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) } as u16;

    let input = INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: scan,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: INJECTED_EXTRA_INFO,
            },
        },
    };

    let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
    if sent != 1 {
        warn!("SendInput rejected {} (up={})", key, up);
        return false;
    }
    true
}
