//! Structural UI Automation backend.
//!
//! Resolves controls through the accessibility tree wherever the client
//! exposes them, and only falls back to coordinate estimates or keyboard
//! navigation when a lookup comes up empty. Preferred over the coordinate
//! adapter because tree queries survive window moves and DPI changes.

#![cfg(target_os = "windows")]

use std::sync::Arc;

use tracing::{debug, info, warn};
use uiautomation::controls::ControlType;
use uiautomation::UIElement;

use super::common::{
    find_main_window, find_window_by_handle, find_window_by_title, new_automation, window_ref_from,
    ThreadSafeAutomation, ThreadSafeElement,
};
use super::{BackendKind, WeChatBackend};
use crate::config::{
    default_window_rules, BridgeConfig, CoordinateProfile, Timing, COMPOSE_DIALOG_TITLES,
    SEARCH_RESULT_TEXT,
};
use crate::errors::AutomationError;
use crate::input;
use crate::types::{FieldRole, MatchRules, WindowRef};

/// Control types worth probing for a search-result row, in order of how
/// often the client exposes results as that type.
const RESULT_CONTROL_TYPES: [ControlType; 5] = [
    ControlType::ListItem,
    ControlType::Button,
    ControlType::Text,
    ControlType::Pane,
    ControlType::Custom,
];

/// Coordinate guesses for the first result row, relative to the window
/// origin, tried when no result control is in the tree.
const RESULT_POINT_ESTIMATES: [(i32, i32); 4] = [(150, 130), (150, 150), (200, 120), (180, 140)];

pub struct UiaBackend {
    automation: ThreadSafeAutomation,
    profile: CoordinateProfile,
    timing: Timing,
    rules: MatchRules,
    window: Option<ThreadSafeElement>,
    window_ref: Option<WindowRef>,
}

impl UiaBackend {
    pub fn new(config: &BridgeConfig) -> Result<Self, AutomationError> {
        Ok(Self {
            automation: new_automation()?,
            profile: config.profile.clone(),
            timing: config.timing.clone(),
            rules: default_window_rules(),
            window: None,
            window_ref: None,
        })
    }

    fn window_element(&self) -> Result<Arc<UIElement>, AutomationError> {
        self.window
            .as_ref()
            .map(|w| w.0.clone())
            .ok_or_else(|| AutomationError::Internal("backend used before connect".to_string()))
    }

    /// Find a descendant of `scope` whose name contains any of `needles`.
    fn find_descendant(
        &self,
        scope: &UIElement,
        control_type: ControlType,
        needles: &[String],
        depth: u32,
        timeout_ms: u64,
    ) -> Option<UIElement> {
        let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
        self.automation
            .0
            .create_matcher()
            .from_ref(scope)
            .control_type(control_type)
            .filter_fn(Box::new(move |e: &UIElement| {
                let name = e.get_name().unwrap_or_default().to_lowercase();
                Ok(!name.is_empty() && needles.iter().any(|n| name.contains(n)))
            }))
            .depth(depth)
            .timeout(timeout_ms)
            .find_first()
            .ok()
    }

    fn click_element(&self, element: &UIElement) -> Result<(), AutomationError> {
        element.try_focus();
        element
            .click()
            .map_err(|e| AutomationError::PlatformError(e.to_string()))
    }

    /// Probe whether an add-to-contacts control is visible, used to judge
    /// whether a coordinate-estimate click actually landed on a result.
    fn add_button(&self, scope: &UIElement) -> Option<UIElement> {
        self.find_descendant(
            scope,
            ControlType::Button,
            &["添加到通讯录".to_string(), "添加".to_string()],
            15,
            800,
        )
    }
}

impl WeChatBackend for UiaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Structural
    }

    fn connect(&mut self, hint: Option<isize>) -> Result<WindowRef, AutomationError> {
        let element = find_main_window(&self.automation, &self.rules, hint)?.ok_or_else(|| {
            AutomationError::WindowNotFound("no WeChat main window on screen".to_string())
        })?;
        let window_ref = window_ref_from(&element)?;
        info!(title = %window_ref.title, handle = window_ref.handle, "uia backend connected");
        self.window = Some(ThreadSafeElement(Arc::new(element)));
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
        if let Some(window) = &self.window {
            let _ = window.0.set_focus();
        }
        input::settle(self.timing.click_settle_ms);
        Ok(true)
    }

    fn open_compose_surface(&mut self) -> Result<bool, AutomationError> {
        let window = self.window_element()?;

        // Toolbar "+" first, then the popup menu entry. The menu lives in
        // its own top-level popup, so the second lookup runs from the root.
        if let Some(plus) =
            self.find_descendant(&window, ControlType::Button, &["添加".to_string()], 12, 1500)
        {
            self.click_element(&plus)?;
            input::settle(self.timing.click_settle_ms);

            if let Ok(root) = self.automation.0.get_root_element() {
                if let Some(entry) = self.find_descendant(
                    &root,
                    ControlType::MenuItem,
                    &["添加朋友".to_string()],
                    8,
                    1500,
                ) {
                    self.click_element(&entry)?;
                    input::settle(self.timing.surface_settle_ms);
                    return Ok(find_window_by_title(&self.automation, COMPOSE_DIALOG_TITLES)?
                        .is_some());
                }
            }
        }

        // No tree path to the menu; the global search box reached via
        // Ctrl+F also accepts account ids.
        debug!("structural menu path failed, falling back to search shortcut");
        input::send_keys(&window, "{Ctrl}F")?;
        input::settle(self.timing.click_settle_ms);
        Ok(true)
    }

    fn submit_search(&mut self, text: &str) -> Result<bool, AutomationError> {
        let window = self.window_element()?;
        // After the compose surface or the search shortcut, the focused
        // control is the query field.
        let target = find_window_by_title(&self.automation, COMPOSE_DIALOG_TITLES)?
            .map(Arc::new)
            .unwrap_or_else(|| window.clone());
        input::paste_text(&target, text, true)?;
        input::send_keys(&target, "{enter}")?;
        input::settle(self.timing.search_settle_ms);
        Ok(true)
    }

    fn click_search_result(&mut self, search_text: &str) -> Result<bool, AutomationError> {
        let window = self.window_element()?;
        let needles = vec![SEARCH_RESULT_TEXT.to_string(), search_text.to_string()];

        // Strategy 1: a result control naming the query or the "network
        // lookup" row.
        for control_type in RESULT_CONTROL_TYPES {
            if let Some(result) = self.find_descendant(&window, control_type, &needles, 20, 600) {
                debug!(?control_type, "clicking structural search result");
                self.click_element(&result)?;
                input::settle(self.timing.surface_settle_ms);
                return Ok(true);
            }
        }

        // Strategy 2: click where the first result row usually renders and
        // check whether an add control appeared.
        if let Some(w) = &self.window_ref {
            if let Some(element) = find_window_by_handle(&self.automation, w.handle)? {
                let fresh = window_ref_from(&element)?;
                for (dx, dy) in RESULT_POINT_ESTIMATES {
                    input::click_at(fresh.bounds.left + dx, fresh.bounds.top + dy)?;
                    input::settle(self.timing.click_settle_ms);
                    if self.add_button(&element).is_some() {
                        debug!(dx, dy, "coordinate estimate hit a result row");
                        input::settle(self.timing.surface_settle_ms);
                        return Ok(true);
                    }
                }
            }
        }

        // Strategy 3: the result list is keyboard-navigable.
        warn!("no structural result found, trying keyboard selection");
        input::send_keys(&window, "{down}{enter}")?;
        input::settle(self.timing.surface_settle_ms);
        Ok(true)
    }

    fn click_add_button(&mut self, _dialog: &WindowRef) -> Result<bool, AutomationError> {
        let window = self.window_element()?;
        let scope = find_window_by_title(&self.automation, COMPOSE_DIALOG_TITLES)?
            .map(Arc::new)
            .unwrap_or_else(|| window.clone());
        match self.add_button(&scope) {
            Some(button) => {
                self.click_element(&button)?;
                input::settle(self.timing.surface_settle_ms);
                Ok(true)
            }
            None => Ok(false),
        }
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

        // The dialog exposes its edits as unnamed controls, so target them
        // by vertical position: message box in the upper region, remark
        // below it.
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
        if let Some(element) = find_window_by_handle(&self.automation, dialog.handle)? {
            if let Some(button) = self.find_descendant(
                &element,
                ControlType::Button,
                &["发送".to_string(), "确定".to_string()],
                10,
                1500,
            ) {
                self.click_element(&button)?;
                input::settle(self.timing.click_settle_ms);
                return Ok(true);
            }

            // Last resort: the confirm control keeps a stable offset from
            // the dialog's bottom-left corner.
            let fresh = window_ref_from(&element)?;
            let (dx, dy) = self.profile.confirm_offset;
            input::click_at(fresh.bounds.left + dx, fresh.bounds.bottom() - dy)?;
            input::settle(self.timing.click_settle_ms);
            return Ok(true);
        }
        Ok(false)
    }
}
