//! Process and window discovery for the WeChat client.
//!
//! Process enumeration is cross-platform through sysinfo; window
//! enumeration needs the accessibility tree and is Windows only.

use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use crate::config::WECHAT_PROCESS_NAMES;
use crate::errors::AutomationError;
use crate::types::{ProcessInfo, StatusReport, WindowRef};

/// List running WeChat processes by executable name.
pub fn list_wechat_processes() -> Vec<ProcessInfo> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut found: Vec<ProcessInfo> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            let name = process.name().to_string_lossy().to_string();
            let stem = name
                .strip_suffix(".exe")
                .or_else(|| name.strip_suffix(".EXE"))
                .unwrap_or(&name);
            let matches = WECHAT_PROCESS_NAMES
                .iter()
                .any(|known| stem.eq_ignore_ascii_case(known) || stem == *known);
            if !matches {
                return None;
            }
            Some(ProcessInfo {
                pid: pid.as_u32(),
                name,
                exe: process.exe().map(|p| p.display().to_string()),
            })
        })
        .collect();
    found.sort_by_key(|p| p.pid);
    debug!(count = found.len(), "wechat process scan");
    found
}

/// Whether a WeChat install is present on this machine. Checked from the
/// default install locations first, then inferred from a running process.
pub fn is_installed(processes: &[ProcessInfo]) -> bool {
    #[cfg(target_os = "windows")]
    {
        const INSTALL_CANDIDATES: [&str; 4] = [
            r"C:\Program Files\Tencent\WeChat\WeChat.exe",
            r"C:\Program Files\Tencent\Weixin\Weixin.exe",
            r"C:\Program Files (x86)\Tencent\WeChat\WeChat.exe",
            r"C:\Program Files (x86)\Tencent\Weixin\Weixin.exe",
        ];
        if INSTALL_CANDIDATES
            .iter()
            .any(|p| std::path::Path::new(p).exists())
        {
            return true;
        }
    }
    !processes.is_empty()
}

/// List visible top-level WeChat windows.
///
/// When several windows match, each gets a `display_name` that
/// disambiguates it by class and position in the list, so a caller can
/// show a usable picker.
#[cfg(target_os = "windows")]
pub fn list_wechat_windows() -> Result<Vec<WindowRef>, AutomationError> {
    let mut windows = windows_matching(&crate::config::default_window_rules())?;

    if windows.len() > 1 {
        for (index, window) in windows.iter_mut().enumerate() {
            window.display_name = Some(format!(
                "{} #{} ({})",
                window.title,
                index + 1,
                window.class_name
            ));
        }
    }
    debug!(count = windows.len(), "wechat window scan");
    Ok(windows)
}

#[cfg(not(target_os = "windows"))]
pub fn list_wechat_windows() -> Result<Vec<WindowRef>, AutomationError> {
    Err(AutomationError::UnsupportedPlatform(
        "window enumeration requires Windows UI Automation".to_string(),
    ))
}

/// List visible login splash windows. A non-empty result with no main
/// windows means the client is up but waiting for a QR scan.
#[cfg(target_os = "windows")]
pub fn list_login_windows() -> Result<Vec<WindowRef>, AutomationError> {
    windows_matching(&crate::config::login_window_rules())
}

#[cfg(not(target_os = "windows"))]
pub fn list_login_windows() -> Result<Vec<WindowRef>, AutomationError> {
    Err(AutomationError::UnsupportedPlatform(
        "window enumeration requires Windows UI Automation".to_string(),
    ))
}

#[cfg(target_os = "windows")]
fn windows_matching(
    rules: &crate::types::MatchRules,
) -> Result<Vec<WindowRef>, AutomationError> {
    use crate::backend::common::{new_automation, top_level_windows, window_ref_from};

    let automation = new_automation()?;
    let mut windows = Vec::new();
    for element in top_level_windows(&automation)? {
        if element.is_offscreen().unwrap_or(true) {
            continue;
        }
        let candidate = window_ref_from(&element)?;
        if rules.matches(&candidate.title, &candidate.class_name) {
            windows.push(candidate);
        }
    }
    Ok(windows)
}

/// Bring a window to the foreground and flash its taskbar button so the
/// user can tell multiple WeChat windows apart.
#[cfg(target_os = "windows")]
pub fn highlight_window(handle: isize) -> Result<(), AutomationError> {
    use crate::backend::common::{activate_hwnd, flash_hwnd};
    activate_hwnd(handle)?;
    flash_hwnd(handle)
}

#[cfg(not(target_os = "windows"))]
pub fn highlight_window(_handle: isize) -> Result<(), AutomationError> {
    Err(AutomationError::UnsupportedPlatform(
        "window highlighting requires Windows".to_string(),
    ))
}

/// Classify the client: not running, running at the login screen, or
/// logged in with a usable main window.
pub fn check_status() -> StatusReport {
    let processes = list_wechat_processes();
    let installed = is_installed(&processes);
    // Login splashes are matched by their own rules; the main-window set
    // never contains them.
    let windows = list_wechat_windows().unwrap_or_default();
    let login_windows = list_login_windows().map(|w| w.len()).unwrap_or(0);
    classify_status(installed, processes, windows, login_windows)
}

fn classify_status(
    installed: bool,
    processes: Vec<ProcessInfo>,
    windows: Vec<WindowRef>,
    login_windows: usize,
) -> StatusReport {
    if processes.is_empty() {
        return StatusReport {
            installed,
            running: false,
            logged_in: false,
            window_count: 0,
            processes,
            windows: Vec::new(),
            message: if installed {
                "WeChat is installed but not running".to_string()
            } else {
                "WeChat is not installed".to_string()
            },
        };
    }

    if windows.is_empty() {
        let message = if login_windows > 0 {
            "WeChat is running at the login screen".to_string()
        } else {
            "WeChat is running but no usable window was found".to_string()
        };
        return StatusReport {
            installed,
            running: true,
            logged_in: false,
            window_count: 0,
            processes,
            windows,
            message,
        };
    }

    let count = windows.len();
    StatusReport {
        installed,
        running: true,
        logged_in: true,
        window_count: count,
        processes,
        windows,
        message: format!("WeChat is logged in with {count} window(s)"),
    }
}
