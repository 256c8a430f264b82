//! Coordinate/keyboard backend.
//!
//! Drives the client with version-profiled offset clicks and ordinal key
//! navigation, no accessibility-tree queries beyond window lookup. All
//! pixel geometry comes from the [`CoordinateProfile`] table; the offsets
//! are validated against WeChat 4.1.6.46 and are expected to break on
//! major UI revisions, which is why this adapter is the fallback.

#![cfg(target_os = "windows")]

use tracing::{debug, info, warn};

use super::common::{
    find_main_window, find_window_by_handle, find_window_by_title, new_automation, window_ref_from,
    ThreadSafeAutomation, ThreadSafeElement,
};
use super::{BackendKind, WeChatBackend};
use crate::config::{
    default_window_rules, BridgeConfig, CoordinateProfile, Timing, COMPOSE_DIALOG_TITLES,
};
use crate::errors::AutomationError;
use crate::input;
use crate::types::{FieldRole, MatchRules, WindowRef};

pub struct RpaBackend {
    automation: ThreadSafeAutomation,
    profile: CoordinateProfile,
    timing: Timing,
    rules: MatchRules,
    window: Option<ThreadSafeElement>,
    window_ref: Option<WindowRef>,
    compose: Option<ThreadSafeElement>,
}

impl RpaBackend {
    pub fn new(config: &BridgeConfig) -> Result<Self, AutomationError> {
        Ok(Self {
            automation: new_automation()?,
            profile: config.profile.clone(),
            timing: config.timing.clone(),
            rules: default_window_rules(),
            window: None,
            window_ref: None,
            compose: None,
        })
    }

    fn window_element(&self) -> Result<&ThreadSafeElement, AutomationError> {
        self.window.as_ref().ok_or_else(|| {
            AutomationError::Internal("backend used before connect".to_string())
        })
    }

    /// Geometry goes stale between steps; re-read it from the handle.
    fn fresh_bounds(&self, window: &WindowRef) -> Result<WindowRef, AutomationError> {
        match find_window_by_handle(&self.automation, window.handle)? {
            Some(element) => window_ref_from(&element),
            None => Ok(window.clone()),
        }
    }
}

impl WeChatBackend for RpaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Coordinate
    }

    fn connect(&mut self, hint: Option<isize>) -> Result<WindowRef, AutomationError> {
        let element = find_main_window(&self.automation, &self.rules, hint)?.ok_or_else(|| {
            AutomationError::WindowNotFound("no WeChat main window on screen".to_string())
        })?;
        let window_ref = window_ref_from(&element)?;
        info!(title = %window_ref.title, handle = window_ref.handle, "rpa backend connected");
        self.window = Some(ThreadSafeElement(std::sync::Arc::new(element)));
        self.window_ref = Some(window_ref.clone());
        Ok(window_ref)
    }

    fn is_alive(&self) -> bool {
        match &self.window_ref {
            Some(w) => matches!(
                find_window_by_handle(&self.automation, w.handle),
                Ok(Some(_))
            ),
            None => false,
        }
    }

    fn activate(&mut self) -> Result<bool, AutomationError> {
        let window_ref = self
            .window_ref
            .as_ref()
            .ok_or_else(|| AutomationError::Internal("backend used before connect".to_string()))?;
        super::common::activate_hwnd(window_ref.handle)?;
        input::settle(self.timing.click_settle_ms);
        Ok(true)
    }

    fn open_compose_surface(&mut self) -> Result<bool, AutomationError> {
        let window_ref = self.window_ref.clone().ok_or_else(|| {
            AutomationError::Internal("backend used before connect".to_string())
        })?;
        let fresh = self.fresh_bounds(&window_ref)?;

        // Click "+" on the toolbar, then walk the popup menu: the "add
        // friend" entry sits a fixed number of rows down.
        let (dx, dy) = self.profile.plus_button_offset;
        input::click_at(fresh.bounds.left + dx, fresh.bounds.top + dy)?;
        input::settle(self.timing.click_settle_ms);

        let window = self.window_element()?.0.clone();
        for _ in 0..self.profile.menu_down_presses {
            input::send_keys(&window, "{down}")?;
            input::settle(200);
        }
        input::send_keys(&window, "{enter}")?;
        input::settle(self.timing.surface_settle_ms);

        match find_window_by_title(&self.automation, COMPOSE_DIALOG_TITLES)? {
            Some(dialog) => {
                debug!("compose dialog open");
                self.compose = Some(ThreadSafeElement(std::sync::Arc::new(dialog)));
                Ok(true)
            }
            None => {
                warn!("compose dialog did not appear after menu navigation");
                Ok(false)
            }
        }
    }

    fn submit_search(&mut self, text: &str) -> Result<bool, AutomationError> {
        let compose = match &self.compose {
            Some(c) => c.0.clone(),
            None => return Ok(false),
        };
        let dialog_ref = window_ref_from(&compose)?;

        let (dx, dy) = self.profile.search_input_offset;
        input::click_at(dialog_ref.bounds.center_x() + dx, dialog_ref.bounds.top + dy)?;
        input::settle(self.timing.click_settle_ms);

        input::paste_text(&compose, text, true)?;
        input::send_keys(&compose, "{enter}")?;
        input::settle(self.timing.search_settle_ms);
        Ok(true)
    }

    fn click_search_result(&mut self, _search_text: &str) -> Result<bool, AutomationError> {
        // Results land inline in the compose dialog; selecting happens via
        // the add-to-contacts click that follows.
        Ok(true)
    }

    fn click_add_button(&mut self, dialog: &WindowRef) -> Result<bool, AutomationError> {
        // The dialog grows when results arrive, so the stored rectangle is
        // useless here.
        let fresh = self.fresh_bounds(dialog)?;
        let x = fresh.bounds.center_x();
        let y = fresh.bounds.bottom() - self.profile.add_button_bottom_margin;
        debug!(x, y, "clicking add-to-contacts");
        input::click_at(x, y)?;
        input::settle(self.timing.surface_settle_ms);
        Ok(true)
    }

    fn probe_result_dialog(
        &mut self,
        pattern: &str,
    ) -> Result<Option<WindowRef>, AutomationError> {
        match find_window_by_title(&self.automation, &[pattern])? {
            Some(element) => Ok(Some(window_ref_from(&element)?)),
            None => Ok(None),
        }
    }

    fn fill_field(
        &mut self,
        dialog: &WindowRef,
        role: FieldRole,
        text: &str,
    ) -> Result<bool, AutomationError> {
        let element = match find_window_by_handle(&self.automation, dialog.handle)? {
            Some(e) => e,
            None => {
                warn!(handle = dialog.handle, "apply dialog vanished before fill");
                return Ok(false);
            }
        };
        let fresh = window_ref_from(&element)?;

        let fraction = match role {
            FieldRole::Message => self.profile.message_field_fraction,
            FieldRole::Remark => self.profile.remark_field_fraction,
        };
        let x = fresh.bounds.center_x();
        let y = fresh.bounds.top + (fresh.bounds.height as f64 * fraction) as i32;
        debug!(?role, x, y, "clicking dialog field");
        input::click_at(x, y)?;
        input::settle(self.timing.click_settle_ms);

        input::paste_text(&element, text, true)?;
        Ok(true)
    }

    fn confirm(&mut self, dialog: &WindowRef) -> Result<bool, AutomationError> {
        let fresh = self.fresh_bounds(dialog)?;
        let (dx, dy) = self.profile.confirm_offset;
        input::click_at(fresh.bounds.left + dx, fresh.bounds.bottom() - dy)?;
        input::settle(self.timing.click_settle_ms);

        // Dismiss any leftover popup.
        if let Some(window) = &self.window {
            let _ = input::send_keys(&window.0, "{esc}");
        }
        Ok(true)
    }
}
