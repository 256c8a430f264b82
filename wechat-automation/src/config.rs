//! Configuration for the automation layer.
//!
//! All version-coupled pixel geometry lives in one [`CoordinateProfile`]
//! table keyed by the detected client generation, so a UI change in a new
//! WeChat release means one table edit instead of a hunt through the
//! workflow code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::MatchRules;

/// Known main/dialog window classes across WeChat generations.
pub const WECHAT_WINDOW_CLASSES: &[&str] = &[
    "WeChatMainWndForPC",
    "WeixinMainWndForPC",
    "WeChatLoginWndForPC",
    "WeixinLoginWndForPC",
    "Qt51514QWindowIcon",
    "ChatWnd",
    "AddContactWnd",
    "CefWebViewWnd",
];

/// Login-only classes, excluded from the "logged in" window set.
pub const WECHAT_LOGIN_CLASSES: &[&str] = &["WeChatLoginWndForPC", "WeixinLoginWndForPC"];

/// Process-name keywords for the process snapshot.
pub const WECHAT_PROCESS_NAMES: &[&str] = &["WeChat", "Weixin", "微信", "WeChatAppEx", "WeChatApp"];

/// Title/class keywords identifying any WeChat window.
pub const WECHAT_WINDOW_KEYWORDS: &[&str] = &["WeChat", "Weixin", "微信", "WxWork"];

/// Titles of the compose ("add friend") dialog.
pub const COMPOSE_DIALOG_TITLES: &[&str] = &["添加朋友"];

/// Titles of the apply ("申请添加朋友") dialog where message/remark are
/// filled. Deliberately excludes the bare compose title, which stays on
/// screen behind the apply dialog and would shadow it.
pub const APPLY_DIALOG_TITLES: &[&str] = &["申请添加朋友", "申请添加"];

/// Text of the inline search result that triggers a network lookup.
pub const SEARCH_RESULT_TEXT: &str = "网络查找";

/// Default rules for locating usable (logged-in) WeChat windows. Known
/// window classes match whole so Qt shells and chat popups are found even
/// when their title carries no product keyword; the login splash classes
/// are excluded here and picked up by [`login_window_rules`] instead.
pub fn default_window_rules() -> MatchRules {
    MatchRules {
        title_keywords: WECHAT_WINDOW_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        class_keywords: WECHAT_WINDOW_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        exact_classes: WECHAT_WINDOW_CLASSES.iter().map(|s| s.to_string()).collect(),
        excluded_classes: WECHAT_LOGIN_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
}

/// Rules matching only the login splash window.
pub fn login_window_rules() -> MatchRules {
    MatchRules {
        title_keywords: Vec::new(),
        class_keywords: Vec::new(),
        exact_classes: WECHAT_LOGIN_CLASSES.iter().map(|s| s.to_string()).collect(),
        excluded_classes: Vec::new(),
    }
}

/// Version-specific geometry for the coordinate/keyboard backend.
///
/// Offsets are relative to the owning window's top-left corner; field
/// positions inside dialogs are expressed as a fraction of dialog height
/// so a dialog that resizes after a search keeps the click on target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateProfile {
    /// Offset of the "+" toolbar button from the main window's top-left.
    pub plus_button_offset: (i32, i32),
    /// Down presses to reach "add friend" in the "+" menu.
    pub menu_down_presses: u32,
    /// Offset of the compose dialog's search input from its top-left,
    /// horizontal part relative to dialog center.
    pub search_input_offset: (i32, i32),
    /// Distance of the "add to contacts" button from the dialog bottom.
    pub add_button_bottom_margin: i32,
    /// Vertical position of the greeting field, as a fraction of dialog height.
    pub message_field_fraction: f64,
    /// Vertical position of the remark field, as a fraction of dialog height.
    pub remark_field_fraction: f64,
    /// Confirm button offset: x from dialog left, y up from dialog bottom.
    pub confirm_offset: (i32, i32),
}

impl Default for CoordinateProfile {
    fn default() -> Self {
        // Verified against WeChat 4.1.6.46.
        Self {
            plus_button_offset: (245, 40),
            menu_down_presses: 2,
            search_input_offset: (-50, 65),
            add_button_bottom_margin: 70,
            message_field_fraction: 0.18,
            remark_field_fraction: 0.35,
            confirm_offset: (120, 50),
        }
    }
}

/// Look up the coordinate profile for a detected client version string.
pub fn profile_for_version(version: &str) -> CoordinateProfile {
    match version {
        v if v.starts_with("4.") || v.is_empty() => CoordinateProfile::default(),
        // 3.x builds keep the same toolbar layout but a shallower "+" menu.
        v if v.starts_with("3.") => CoordinateProfile {
            plus_button_offset: (30, 130),
            menu_down_presses: 1,
            ..CoordinateProfile::default()
        },
        _ => CoordinateProfile::default(),
    }
}

/// Timing knobs for the workflow. Fixed waits, not adaptive backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    /// Settle delay after a simulated click, in milliseconds.
    pub click_settle_ms: u64,
    /// Settle delay after opening a menu or dialog.
    pub surface_settle_ms: u64,
    /// Wait for search results to load after submitting.
    pub search_settle_ms: u64,
    /// Poll interval while waiting for the result dialog.
    pub dialog_poll_interval_ms: u64,
    /// Upper bound on the result dialog wait.
    pub dialog_poll_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            click_settle_ms: 300,
            surface_settle_ms: 800,
            search_settle_ms: 1500,
            dialog_poll_interval_ms: 250,
            dialog_poll_timeout_ms: 5000,
        }
    }
}

impl Timing {
    pub fn dialog_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dialog_poll_interval_ms)
    }

    pub fn dialog_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.dialog_poll_timeout_ms)
    }
}

/// Top-level automation configuration, owned by the dispatch host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Send the request automatically instead of stopping at "ready".
    pub auto_confirm: bool,
    /// Geometry table for the coordinate backend.
    pub profile: CoordinateProfile,
    pub timing: Timing,
}
