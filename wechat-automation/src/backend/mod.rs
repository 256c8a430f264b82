//! Backend adapters: interchangeable strategies for driving the client.
//!
//! Two implementations satisfy the same contract. [`BackendKind::Structural`]
//! queries the accessibility tree and invokes controls by name; it is the
//! higher-fidelity choice and tried first. [`BackendKind::Coordinate`] falls
//! back to version-profiled offset clicks and ordinal keyboard navigation.
//! The orchestrator commits to whichever backend connects first and never
//! mixes the two within a run.

use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;
use crate::errors::AutomationError;
use crate::types::{FieldRole, WindowRef};

#[cfg(target_os = "windows")]
pub(crate) mod common;
#[cfg(target_os = "windows")]
pub mod rpa;
#[cfg(target_os = "windows")]
pub mod uia;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Accessibility-tree introspection (UI Automation).
    Structural,
    /// Offset clicks plus keyboard navigation.
    Coordinate,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Structural => "uia",
            BackendKind::Coordinate => "rpa",
        }
    }
}

/// Preference order: structural first, coordinate as the fallback.
pub const DEFAULT_PREFERENCE: [BackendKind; 2] = [BackendKind::Structural, BackendKind::Coordinate];

/// The uniform capability set both adapters implement.
///
/// Operations are blocking; callers run them under `spawn_blocking`.
/// Expected negative outcomes ("dialog not found", "click missed") come
/// back as `Ok(false)` / `Ok(None)` — `Err` means the OS call itself failed.
pub trait WeChatBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Resolve and attach to the target main window. `hint` pins a specific
    /// window handle; otherwise the most recently activated match wins.
    fn connect(&mut self, hint: Option<isize>) -> Result<WindowRef, AutomationError>;

    /// Cheap liveness probe for pooled reuse: the connected window still exists.
    fn is_alive(&self) -> bool;

    /// Bring the connected window to the foreground.
    fn activate(&mut self) -> Result<bool, AutomationError>;

    /// Drive the UI path that opens the add-friend compose surface.
    fn open_compose_surface(&mut self) -> Result<bool, AutomationError>;

    /// Put `text` into the active search input via clipboard paste and submit.
    /// Never keystroke-typed: direct typing loses non-Latin characters.
    fn submit_search(&mut self, text: &str) -> Result<bool, AutomationError>;

    /// Select the inline search result that opens the contact pane.
    fn click_search_result(&mut self, search_text: &str) -> Result<bool, AutomationError>;

    /// Click the "add to contacts" control on `dialog`.
    fn click_add_button(&mut self, dialog: &WindowRef) -> Result<bool, AutomationError>;

    /// Single snapshot probe for a secondary window whose title contains
    /// `pattern`. The bounded poll around this lives in the orchestrator.
    fn probe_result_dialog(&mut self, pattern: &str)
        -> Result<Option<WindowRef>, AutomationError>;

    /// Click into a field of `dialog` (geometry re-read from the handle,
    /// vertical position as a fraction of dialog height), select existing
    /// content and paste `text`.
    fn fill_field(
        &mut self,
        dialog: &WindowRef,
        role: FieldRole,
        text: &str,
    ) -> Result<bool, AutomationError>;

    /// Click the terminal confirm control of `dialog`.
    fn confirm(&mut self, dialog: &WindowRef) -> Result<bool, AutomationError>;
}

/// Per-backend availability, surfaced by `ping` so callers can pre-flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackendAvailability {
    pub uia: bool,
    pub rpa: bool,
}

impl BackendAvailability {
    pub fn any(&self) -> bool {
        self.uia || self.rpa
    }
}

/// Create the adapter for `kind` on the current platform.
pub fn create_backend(
    kind: BackendKind,
    config: &BridgeConfig,
) -> Result<Box<dyn WeChatBackend>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        match kind {
            BackendKind::Structural => Ok(Box::new(uia::UiaBackend::new(config)?)),
            BackendKind::Coordinate => Ok(Box::new(rpa::RpaBackend::new(config)?)),
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = (kind, config);
        Err(AutomationError::UnsupportedPlatform(
            "WeChat automation backends require Windows".to_string(),
        ))
    }
}

/// Probe which adapters can initialize on this machine.
pub fn availability() -> BackendAvailability {
    #[cfg(target_os = "windows")]
    {
        let probe = common::automation_available();
        BackendAvailability {
            uia: probe,
            rpa: probe,
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        BackendAvailability {
            uia: false,
            rpa: false,
        }
    }
}
