use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const MIN_POLL_SPACING: Duration = Duration::from_millis(100);

/// Border/DPI rounding absorbed on each edge when comparing bounds.
pub const FULLSCREEN_TOLERANCE_PX: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

pub fn is_fullscreen(window: Rect, monitor: Rect) -> bool {
    let near = |a: i32, b: i32| (a - b).abs() <= FULLSCREEN_TOLERANCE_PX;
    near(window.left, monitor.left)
        && near(window.top, monitor.top)
        && near(window.right, monitor.right)
        && near(window.bottom, monitor.bottom)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundProcess {
    pub pid: u32,
    pub name: String,
    pub path: String,
    pub title: String,
}

impl ForegroundProcess {
    /// Builds the record from a full image path; `name` is its file name.
    pub fn from_path(pid: u32, path: impl Into<String>, title: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        Self {
            pid,
            name,
            path,
            title: title.into(),
        }
    }
}

/// One sample of the foreground window. `process` is `None` when nothing
/// could be resolved (desktop focused, access denied, unsupported platform).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub process: Option<ForegroundProcess>,
    pub is_fullscreen: bool,
}

impl WindowSnapshot {
    /// Whether the change is one the gate cares about.
    fn differs_from(&self, other: &WindowSnapshot) -> bool {
        let pid = |s: &WindowSnapshot| s.process.as_ref().map(|p| p.pid);
        let title = |s: &WindowSnapshot| s.process.as_ref().map(|p| p.title.clone());
        pid(self) != pid(other)
            || title(self) != title(other)
            || self.is_fullscreen != other.is_fullscreen
    }
}

pub trait WindowProbe: Send + Sync {
    fn sample(&self) -> WindowSnapshot;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullWindowProbe;

impl WindowProbe for NullWindowProbe {
    fn sample(&self) -> WindowSnapshot {
        WindowSnapshot::default()
    }
}

pub fn native_probe() -> Arc<dyn WindowProbe> {
    #[cfg(windows)]
    {
        Arc::new(win32::Win32WindowProbe)
    }
    #[cfg(not(windows))]
    {
        Arc::new(NullWindowProbe)
    }
}

pub type WindowListener = Arc<dyn Fn(&WindowSnapshot) + Send + Sync>;

struct Worker {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Samples a [`WindowProbe`] on a background thread and publishes changes.
pub struct WindowMonitor {
    probe: Arc<dyn WindowProbe>,
    interval: Duration,
    current: RwLock<Arc<WindowSnapshot>>,
    last_poll: Mutex<Option<Instant>>,
    listeners: Mutex<Vec<WindowListener>>,
    worker: Mutex<Option<Worker>>,
}

impl WindowMonitor {
    pub fn new(probe: Arc<dyn WindowProbe>) -> Self {
        Self::with_interval(probe, POLL_INTERVAL)
    }

    pub fn with_interval(probe: Arc<dyn WindowProbe>, interval: Duration) -> Self {
        Self {
            probe,
            interval: interval.max(MIN_POLL_SPACING),
            current: RwLock::new(Arc::new(WindowSnapshot::default())),
            last_poll: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Arc<WindowSnapshot> {
        self.current.read().clone()
    }

    pub fn on_change(&self, listener: impl Fn(&WindowSnapshot) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Takes one sample unless the previous one is younger than
    /// [`MIN_POLL_SPACING`]. Returns whether listeners were notified.
    pub fn poll(&self) -> bool {
        {
            let mut last = self.last_poll.lock();
            let now = Instant::now();
            if last.is_some_and(|t| now.duration_since(t) < MIN_POLL_SPACING) {
                return false;
            }
            *last = Some(now);
        }

        let next = Arc::new(self.probe.sample());
        {
            let mut current = self.current.write();
            if !next.differs_from(&current) {
                return false;
            }
            *current = next.clone();
        }

        debug!(
            "Foreground changed: {:?} fullscreen={}",
            next.process.as_ref().map(|p| &p.name),
            next.is_fullscreen
        );
        let listeners: Vec<WindowListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(&next);
        }
        true
    }

    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let monitor = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("keyveto-window".to_string())
            .spawn(move || loop {
                monitor.poll();
                match stop_rx.recv_timeout(monitor.interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            });

        match spawned {
            Ok(join) => {
                info!("Window monitor started ({:?} interval)", self.interval);
                *worker = Some(Worker { stop_tx, join });
            }
            Err(e) => warn!("Failed to spawn window monitor: {}", e),
        }
    }

    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.stop_tx.send(());
        if worker.join.join().is_err() {
            warn!("Window monitor thread panicked");
        }
        info!("Window monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn cleanup(&self) {
        self.stop();
        self.listeners.lock().clear();
    }
}

#[cfg(windows)]
mod win32 {
    use super::{is_fullscreen, ForegroundProcess, Rect, WindowProbe, WindowSnapshot};
    use windows::core::PWSTR;
    use windows::Win32::Foundation::{CloseHandle, HWND, RECT};
    use windows::Win32::Graphics::Gdi::{
        GetMonitorInfoW, MonitorFromWindow, MONITORINFO, MONITOR_DEFAULTTONEAREST,
    };
    use windows::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
        PROCESS_QUERY_LIMITED_INFORMATION,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowRect, GetWindowTextW, GetWindowThreadProcessId,
    };

    /// Samples the real foreground window through Win32.
    pub struct Win32WindowProbe;

    fn to_rect(r: RECT) -> Rect {
        Rect::new(r.left, r.top, r.right, r.bottom)
    }

    fn process_path(pid: u32) -> Option<String> {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
            let mut buf = [0u16; 1024];
            let mut len = buf.len() as u32;
            let result = QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_WIN32,
                PWSTR(buf.as_mut_ptr()),
                &mut len,
            );
            let _ = CloseHandle(handle);
            result.ok()?;
            Some(String::from_utf16_lossy(&buf[..len as usize]))
        }
    }

    fn window_title(hwnd: HWND) -> String {
        let mut buf = [0u16; 512];
        let len = unsafe { GetWindowTextW(hwnd, &mut buf) };
        String::from_utf16_lossy(&buf[..len.max(0) as usize])
    }

    fn window_is_fullscreen(hwnd: HWND) -> bool {
        unsafe {
            let mut window = RECT::default();
            if GetWindowRect(hwnd, &mut window).is_err() {
                return false;
            }
            let monitor = MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST);
            let mut info = MONITORINFO {
                cbSize: std::mem::size_of::<MONITORINFO>() as u32,
                ..Default::default()
            };
            if !GetMonitorInfoW(monitor, &mut info).as_bool() {
                return false;
            }
            is_fullscreen(to_rect(window), to_rect(info.rcMonitor))
        }
    }

    impl WindowProbe for Win32WindowProbe {
        fn sample(&self) -> WindowSnapshot {
            let hwnd = unsafe { GetForegroundWindow() };
            if hwnd.0 == 0 {
                return WindowSnapshot::default();
            }

            let mut pid = 0u32;
            unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };

            let process = (pid != 0)
                .then(|| process_path(pid))
                .flatten()
                .map(|path| ForegroundProcess::from_path(pid, path, window_title(hwnd)));

            WindowSnapshot {
                process,
                is_fullscreen: window_is_fullscreen(hwnd),
            }
        }
    }
}

#[cfg(windows)]
pub use win32::Win32WindowProbe;
