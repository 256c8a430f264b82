//! Shared Windows plumbing for both backend adapters.

use std::sync::Arc;

use tracing::debug;
use uiautomation::controls::ControlType;
use uiautomation::types::{TreeScope, UIProperty};
use uiautomation::variants::Variant;
use uiautomation::UIAutomation;

use windows::Win32::Foundation::HWND;
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, FlashWindow, IsIconic, SetForegroundWindow, ShowWindow, SW_RESTORE, SW_SHOW,
};

use crate::errors::AutomationError;
use crate::types::{Bounds, MatchRules, WindowRef};

// The COM pointers inside UIAutomation are apartment-bound; we only ever
// touch them from blocking worker threads after per-thread COM init.
#[derive(Clone)]
pub(crate) struct ThreadSafeAutomation(pub Arc<UIAutomation>);

unsafe impl Send for ThreadSafeAutomation {}
unsafe impl Sync for ThreadSafeAutomation {}

#[derive(Clone)]
pub(crate) struct ThreadSafeElement(pub Arc<uiautomation::UIElement>);

unsafe impl Send for ThreadSafeElement {}
unsafe impl Sync for ThreadSafeElement {}

/// Whether UI Automation can initialize on this machine at all.
pub(crate) fn automation_available() -> bool {
    UIAutomation::new().is_ok()
}

pub(crate) fn new_automation() -> Result<ThreadSafeAutomation, AutomationError> {
    let automation =
        UIAutomation::new().map_err(|e| AutomationError::PlatformError(e.to_string()))?;
    Ok(ThreadSafeAutomation(Arc::new(automation)))
}

pub(crate) fn native_handle(element: &uiautomation::UIElement) -> Option<isize> {
    element.get_native_window_handle().ok().map(|h| {
        let hwnd: HWND = h.into();
        hwnd.0 as isize
    })
}

/// Snapshot a `WindowRef` from an element, re-reading geometry now.
pub(crate) fn window_ref_from(
    element: &uiautomation::UIElement,
) -> Result<WindowRef, AutomationError> {
    let rect = element
        .get_bounding_rectangle()
        .map_err(|e| AutomationError::PlatformError(format!("Failed to get window bounds: {e}")))?;
    Ok(WindowRef {
        handle: native_handle(element).unwrap_or_default(),
        title: element.get_name().unwrap_or_default(),
        class_name: element.get_classname().unwrap_or_default(),
        bounds: Bounds {
            left: rect.get_left(),
            top: rect.get_top(),
            width: rect.get_width(),
            height: rect.get_height(),
        },
        display_name: None,
    })
}

/// Enumerate top-level windows in OS order. Children scope only: every
/// application window is a direct child of the desktop.
pub(crate) fn top_level_windows(
    automation: &ThreadSafeAutomation,
) -> Result<Vec<uiautomation::UIElement>, AutomationError> {
    let root = automation
        .0
        .get_root_element()
        .map_err(|e| AutomationError::PlatformError(e.to_string()))?;
    let condition = automation
        .0
        .create_property_condition(
            UIProperty::ControlType,
            Variant::from(ControlType::Window as i32),
            None,
        )
        .map_err(|e| AutomationError::PlatformError(e.to_string()))?;
    root.find_all(TreeScope::Children, &condition)
        .map_err(|e| AutomationError::PlatformError(e.to_string()))
}

/// Find the target main window: by pinned handle if given, otherwise the
/// first on-screen window matching the keyword rules.
pub(crate) fn find_main_window(
    automation: &ThreadSafeAutomation,
    rules: &MatchRules,
    hint: Option<isize>,
) -> Result<Option<uiautomation::UIElement>, AutomationError> {
    for element in top_level_windows(automation)? {
        if element.is_offscreen().unwrap_or(true) {
            continue;
        }
        if let Some(wanted) = hint {
            if native_handle(&element) == Some(wanted) {
                return Ok(Some(element));
            }
            continue;
        }
        let title = element.get_name().unwrap_or_default();
        let class_name = element.get_classname().unwrap_or_default();
        if !title.is_empty() && rules.matches(&title, &class_name) {
            debug!(%title, %class_name, "matched target window");
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// Find a top-level window whose title contains any of `patterns`.
pub(crate) fn find_window_by_title(
    automation: &ThreadSafeAutomation,
    patterns: &[&str],
) -> Result<Option<uiautomation::UIElement>, AutomationError> {
    for element in top_level_windows(automation)? {
        let title = element.get_name().unwrap_or_default();
        if patterns.iter().any(|p| title.contains(p)) {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// Re-resolve a window element from its stored native handle.
pub(crate) fn find_window_by_handle(
    automation: &ThreadSafeAutomation,
    handle: isize,
) -> Result<Option<uiautomation::UIElement>, AutomationError> {
    for element in top_level_windows(automation)? {
        if native_handle(&element) == Some(handle) {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// Restore and bring a window to the foreground.
pub(crate) fn activate_hwnd(handle: isize) -> Result<(), AutomationError> {
    if handle == 0 {
        return Err(AutomationError::InvalidArgument(
            "Window handle is null".to_string(),
        ));
    }
    unsafe {
        let hwnd = HWND(handle as *mut core::ffi::c_void);
        let _ = ShowWindow(hwnd, SW_SHOW);
        if IsIconic(hwnd).as_bool() {
            debug!("window is minimized, restoring");
            let _ = ShowWindow(hwnd, SW_RESTORE);
        }
        let _ = BringWindowToTop(hwnd);
        if !SetForegroundWindow(hwnd).as_bool() {
            debug!("SetForegroundWindow failed, continuing");
        }
    }
    Ok(())
}

/// Flash a window's taskbar entry so the user can tell windows apart.
pub(crate) fn flash_hwnd(handle: isize) -> Result<(), AutomationError> {
    if handle == 0 {
        return Err(AutomationError::InvalidArgument(
            "Window handle is null".to_string(),
        ));
    }
    unsafe {
        let hwnd = HWND(handle as *mut core::ffi::c_void);
        let _ = FlashWindow(hwnd, true.into());
    }
    Ok(())
}
