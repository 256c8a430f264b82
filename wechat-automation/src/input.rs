//! Input driving: absolute-coordinate clicks, key sequences and
//! clipboard-backed text entry.
//!
//! Text always goes through the clipboard. Keystroke typing drops
//! non-Latin characters on some client builds, paste does not.

#![cfg(target_os = "windows")]

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::debug;
use uiautomation::inputs::Mouse;
use uiautomation::types::Point;

use crate::errors::AutomationError;

/// Inter-key interval handed to `send_keys`, in milliseconds.
const KEY_INTERVAL_MS: u64 = 40;

/// The clipboard is process-wide shared state; concurrent workflow runs
/// must not overlap their copy/paste windows.
static CLIPBOARD_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Click at an absolute screen coordinate.
pub(crate) fn click_at(x: i32, y: i32) -> Result<(), AutomationError> {
    debug!(x, y, "clicking at screen point");
    let mouse = Mouse::default();
    mouse
        .click(Point::new(x, y))
        .map_err(|e| AutomationError::PlatformError(e.to_string()))
}

/// Send a key sequence to `target` (uiautomation syntax: `{Ctrl}V`,
/// `{down}`, `{enter}`).
pub(crate) fn send_keys(
    target: &uiautomation::UIElement,
    keys: &str,
) -> Result<(), AutomationError> {
    target
        .send_keys(keys, KEY_INTERVAL_MS as u32)
        .map_err(|e| AutomationError::PlatformError(format!("Failed to send keys: {e:?}")))
}

/// Copy `text` to the clipboard and paste it into the focused input of
/// `target`, optionally replacing existing content.
///
/// Copy, paste and a brief settle run under one lock so a concurrent run
/// cannot swap the clipboard out from under us.
pub(crate) fn paste_text(
    target: &uiautomation::UIElement,
    text: &str,
    replace_existing: bool,
) -> Result<(), AutomationError> {
    let _guard = CLIPBOARD_GUARD
        .lock()
        .map_err(|_| AutomationError::Internal("clipboard guard poisoned".to_string()))?;

    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| AutomationError::ClipboardError(e.to_string()))?;
    clipboard
        .set_text(text.to_string())
        .map_err(|e| AutomationError::ClipboardError(e.to_string()))?;

    if replace_existing {
        send_keys(target, "{Ctrl}A")?;
        thread::sleep(Duration::from_millis(100));
    }
    send_keys(target, "{Ctrl}V")?;
    thread::sleep(Duration::from_millis(200));
    Ok(())
}

/// Fixed settle wait after a simulated action, letting the driven UI catch up.
pub(crate) fn settle(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}
