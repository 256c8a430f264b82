//! Desktop automation for the WeChat Windows client.
//!
//! The crate drives the client through two interchangeable backend
//! adapters: a structural one built on UI Automation tree queries and a
//! coordinate/keyboard one built on version-profiled offsets. On top of
//! the adapters sit window/process discovery and the add-friend workflow
//! state machine. Everything UI-touching is Windows only; discovery,
//! pooling and the workflow logic compile and test everywhere.

pub mod backend;
pub mod config;
pub mod discovery;
pub mod errors;
mod input;
pub mod pool;
pub mod types;
pub mod workflow;

pub use backend::{
    availability, create_backend, BackendAvailability, BackendKind, WeChatBackend,
    DEFAULT_PREFERENCE,
};
pub use config::{profile_for_version, BridgeConfig, CoordinateProfile, Timing};
pub use discovery::{
    check_status, highlight_window, is_installed, list_login_windows, list_wechat_processes,
    list_wechat_windows,
};
pub use errors::AutomationError;
pub use pool::{BackendPool, PooledBackend};
pub use types::{Bounds, FieldRole, MatchRules, ProcessInfo, StatusReport, WindowRef};
pub use workflow::{
    AddFriendRequest, AddFriendWorkflow, FillReport, StepTag, WorkflowOutcome, WorkflowState,
};
