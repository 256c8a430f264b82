//! Common types shared by discovery, backends and the workflow

use serde::{Deserialize, Serialize};

/// Screen-space bounding rectangle of a window, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    pub fn center_x(&self) -> i32 {
        self.left + self.width / 2
    }

    pub fn center_y(&self) -> i32 {
        self.top + self.height / 2
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }
}

/// A snapshot of one top-level window.
///
/// Never cached across workflow steps: the target application moves,
/// resizes and replaces its windows, so geometry is re-read from the
/// handle before every interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRef {
    /// Native window handle (HWND on Windows), opaque to callers.
    pub handle: isize,
    pub title: String,
    pub class_name: String,
    pub bounds: Bounds,
    /// Name shown to the user when several windows share a title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// One process from a process-table snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe: Option<String>,
}

/// Keyword rules for matching windows by title and class name.
///
/// Matching is substring based and case-insensitive for Latin keywords;
/// CJK keywords compare byte-for-byte.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRules {
    pub title_keywords: Vec<String>,
    pub class_keywords: Vec<String>,
    /// Class names matched whole, for windows whose title and class carry
    /// no product keyword at all (Qt shells, chat popups).
    pub exact_classes: Vec<String>,
    /// Class names excluded even when a keyword matches (login splash etc).
    pub excluded_classes: Vec<String>,
}

impl MatchRules {
    pub fn matches(&self, title: &str, class_name: &str) -> bool {
        if self
            .excluded_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class_name))
        {
            return false;
        }
        if self
            .exact_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class_name))
        {
            return true;
        }
        let title_lower = title.to_lowercase();
        let class_lower = class_name.to_lowercase();
        let hit = |keywords: &[String], haystack: &str| {
            keywords
                .iter()
                .any(|kw| haystack.contains(&kw.to_lowercase()))
        };
        hit(&self.title_keywords, &title_lower) || hit(&self.class_keywords, &class_lower)
    }
}

/// Which input field of the apply dialog a fill targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// The greeting shown to the person being added.
    Message,
    /// The local contact remark.
    Remark,
}

/// Tri-state report composed from process and window discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub installed: bool,
    pub running: bool,
    pub logged_in: bool,
    pub window_count: usize,
    pub processes: Vec<ProcessInfo>,
    pub windows: Vec<WindowRef>,
    pub message: String,
}
