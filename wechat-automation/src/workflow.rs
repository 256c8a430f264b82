//! Add-friend workflow orchestrator.
//!
//! The workflow is an explicit forward-only state machine over one
//! connected backend. Every step either advances the state or ends the
//! run in `Failed` with a step tag the caller can surface verbatim; a
//! backend is never swapped mid-run. The only retry anywhere is the
//! bounded dialog poll.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::WeChatBackend;
use crate::config::{Timing, APPLY_DIALOG_TITLES, COMPOSE_DIALOG_TITLES};
use crate::errors::AutomationError;
use crate::types::{FieldRole, WindowRef};

/// Which step a failed run died on. Serialized verbatim into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTag {
    Connect,
    Activate,
    Search,
    ClickResult,
    ClickAdd,
    Message,
    Remark,
    Send,
}

impl StepTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepTag::Connect => "connect",
            StepTag::Activate => "activate",
            StepTag::Search => "search",
            StepTag::ClickResult => "click_result",
            StepTag::ClickAdd => "click_add",
            StepTag::Message => "message",
            StepTag::Remark => "remark",
            StepTag::Send => "send",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    MenuOpened,
    ComposeDialogFound,
    SearchSubmitted,
    ResultDialogFound,
    MessageFilled,
    RemarkFilled,
    Confirmed,
    Failed(StepTag),
}

impl WorkflowState {
    /// Position in the forward sequence; `Failed` is terminal at any rank.
    pub fn rank(&self) -> u8 {
        match self {
            WorkflowState::Idle => 0,
            WorkflowState::MenuOpened => 1,
            WorkflowState::ComposeDialogFound => 2,
            WorkflowState::SearchSubmitted => 3,
            WorkflowState::ResultDialogFound => 4,
            WorkflowState::MessageFilled => 5,
            WorkflowState::RemarkFilled => 6,
            WorkflowState::Confirmed => 7,
            WorkflowState::Failed(_) => u8::MAX,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddFriendRequest {
    /// Account id or phone number to search for.
    pub search_text: String,
    pub nickname: String,
    pub platform: String,
    /// Verification message; skipped when empty.
    pub message: String,
    /// Explicit remark; defaults to `nickname-platform`.
    pub remark: Option<String>,
    pub auto_confirm: bool,
}

impl AddFriendRequest {
    /// Contact remark, composed as `nickname-platform` unless overridden.
    /// Empty when there is nothing to compose from.
    pub fn remark_text(&self) -> String {
        if let Some(remark) = &self.remark {
            return remark.clone();
        }
        if self.nickname.is_empty() {
            return String::new();
        }
        if self.platform.is_empty() {
            self.nickname.clone()
        } else {
            format!("{}-{}", self.nickname, self.platform)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub success: bool,
    /// Terminal step: a failure tag, `"ready"`, or `"done"`.
    pub step: String,
    pub message: String,
    /// Which adapter ran the workflow (`"uia"` or `"rpa"`).
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowRef>,
}

/// Per-field result of the standalone fill operation. `None` means the
/// field was not requested.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FillReport {
    pub message_filled: Option<bool>,
    pub remark_filled: Option<bool>,
}

impl FillReport {
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        match self.message_filled {
            Some(true) => parts.push("verification message filled"),
            Some(false) => parts.push("verification message fill failed"),
            None => {}
        }
        match self.remark_filled {
            Some(true) => parts.push("remark set"),
            Some(false) => parts.push("remark fill failed"),
            None => {}
        }
        if parts.is_empty() {
            "nothing to fill; enter the details manually and press send".to_string()
        } else {
            parts.join("; ")
        }
    }
}

pub struct AddFriendWorkflow<'a> {
    backend: &'a mut dyn WeChatBackend,
    timing: Timing,
    cancel: CancellationToken,
    state: WorkflowState,
}

impl<'a> AddFriendWorkflow<'a> {
    pub fn new(
        backend: &'a mut dyn WeChatBackend,
        timing: Timing,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            timing,
            cancel,
            state: WorkflowState::Idle,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Run the full add-friend sequence on the already-connected backend.
    pub fn run(&mut self, request: &AddFriendRequest) -> Result<WorkflowOutcome, AutomationError> {
        let method = self.backend.kind().as_str().to_string();

        let activated = self.backend.activate();
        if !self.step_ok(activated, StepTag::Activate)? {
            return Ok(self.fail(StepTag::Activate, "could not bring the WeChat window to the foreground", method));
        }
        self.advance(WorkflowState::MenuOpened);

        let opened = self.backend.open_compose_surface();
        if !self.step_ok(opened, StepTag::Search)? {
            return Ok(self.fail(StepTag::Search, "could not open the add-friend surface", method));
        }
        self.advance(WorkflowState::ComposeDialogFound);

        let submitted = self.backend.submit_search(&request.search_text);
        if !self.step_ok(submitted, StepTag::Search)? {
            return Ok(self.fail(StepTag::Search, "could not submit the account search", method));
        }
        self.advance(WorkflowState::SearchSubmitted);

        // The result surface must exist before anything can be clicked in
        // it; a timeout here means the search produced nothing.
        let surface = match self.poll_dialog(COMPOSE_DIALOG_TITLES)? {
            Some(surface) => surface,
            None => {
                return Ok(self.fail(
                    StepTag::ClickResult,
                    "no search result surface appeared within the timeout",
                    method,
                ))
            }
        };

        let clicked = self.backend.click_search_result(&request.search_text);
        if !self.step_ok(clicked, StepTag::ClickResult)? {
            return Ok(self.fail(StepTag::ClickResult, "could not select the search result", method));
        }

        // Best effort: a miss is fine as long as the apply dialog shows up.
        match self.backend.click_add_button(&surface) {
            Ok(true) => {}
            Ok(false) => warn!("add-to-contacts control not found, relying on the result click"),
            Err(err) => {
                warn!(%err, "add-to-contacts click failed");
                self.state = WorkflowState::Failed(StepTag::ClickAdd);
                return Err(err);
            }
        }

        let dialog = match self.poll_dialog(APPLY_DIALOG_TITLES)? {
            Some(dialog) => dialog,
            None => {
                return Ok(self.fail(
                    StepTag::ClickAdd,
                    "the friend-request dialog did not appear",
                    method,
                ))
            }
        };
        self.advance(WorkflowState::ResultDialogFound);

        if !request.message.is_empty() {
            let filled = self.backend.fill_field(&dialog, FieldRole::Message, &request.message);
            if !self.step_ok(filled, StepTag::Message)? {
                return Ok(self.fail(StepTag::Message, "could not fill the verification message", method));
            }
        }
        self.advance(WorkflowState::MessageFilled);

        let remark = request.remark_text();
        if !remark.is_empty() {
            let filled = self.backend.fill_field(&dialog, FieldRole::Remark, &remark);
            if !self.step_ok(filled, StepTag::Remark)? {
                return Ok(self.fail(StepTag::Remark, "could not set the contact remark", method));
            }
        }
        self.advance(WorkflowState::RemarkFilled);

        if !request.auto_confirm {
            info!("workflow paused before confirm, waiting for the user");
            return Ok(WorkflowOutcome {
                success: true,
                step: "ready".to_string(),
                message: "awaiting manual confirmation".to_string(),
                method,
                window: Some(dialog),
            });
        }

        let confirmed = self.backend.confirm(&dialog);
        if !self.step_ok(confirmed, StepTag::Send)? {
            return Ok(self.fail(StepTag::Send, "could not click the send control", method));
        }
        self.advance(WorkflowState::Confirmed);

        Ok(WorkflowOutcome {
            success: true,
            step: "done".to_string(),
            message: "friend request sent".to_string(),
            method,
            window: Some(dialog),
        })
    }

    /// Standalone first half: activate, open the surface, submit the
    /// search, then hand control back so the user can pick the result.
    pub fn run_search(&mut self, search_text: &str) -> Result<WorkflowOutcome, AutomationError> {
        let method = self.backend.kind().as_str().to_string();

        let activated = self.backend.activate();
        if !self.step_ok(activated, StepTag::Activate)? {
            return Ok(self.fail(StepTag::Activate, "could not bring the WeChat window to the foreground", method));
        }
        self.advance(WorkflowState::MenuOpened);

        let opened = self.backend.open_compose_surface();
        if !self.step_ok(opened, StepTag::Search)? {
            return Ok(self.fail(StepTag::Search, "could not open the add-friend surface", method));
        }
        self.advance(WorkflowState::ComposeDialogFound);

        let submitted = self.backend.submit_search(search_text);
        if !self.step_ok(submitted, StepTag::Search)? {
            return Ok(self.fail(StepTag::Search, "could not submit the account search", method));
        }
        self.advance(WorkflowState::SearchSubmitted);

        Ok(WorkflowOutcome {
            success: true,
            step: "ready".to_string(),
            message: format!(
                "searched for {search_text}; click the network-lookup result manually"
            ),
            method,
            window: None,
        })
    }

    /// Standalone second half: the user already reached the friend-request
    /// dialog; fill whichever fields were supplied.
    pub fn run_fill(
        &mut self,
        message: Option<&str>,
        remark: Option<&str>,
    ) -> Result<FillReport, AutomationError> {
        self.checkpoint()?;
        // Fill resolves the dialog by handle, so foregrounding is cosmetic.
        if let Err(err) = self.backend.activate() {
            warn!(%err, "could not foreground WeChat before filling");
        }

        let dialog = self.poll_dialog(APPLY_DIALOG_TITLES)?;
        let mut report = FillReport::default();

        if let Some(text) = message.filter(|t| !t.is_empty()) {
            report.message_filled = Some(match &dialog {
                Some(d) => self
                    .backend
                    .fill_field(d, FieldRole::Message, text)
                    .unwrap_or(false),
                None => false,
            });
        }
        if let Some(text) = remark.filter(|t| !t.is_empty()) {
            report.remark_filled = Some(match &dialog {
                Some(d) => self
                    .backend
                    .fill_field(d, FieldRole::Remark, text)
                    .unwrap_or(false),
                None => false,
            });
        }
        Ok(report)
    }

    fn advance(&mut self, next: WorkflowState) {
        debug!(from = ?self.state, to = ?next, "workflow transition");
        debug_assert!(next.rank() > self.state.rank());
        self.state = next;
    }

    fn fail(&mut self, tag: StepTag, message: &str, method: String) -> WorkflowOutcome {
        warn!(step = tag.as_str(), message, "workflow failed");
        self.state = WorkflowState::Failed(tag);
        WorkflowOutcome {
            success: false,
            step: tag.as_str().to_string(),
            message: message.to_string(),
            method,
            window: None,
        }
    }

    /// Unwrap a step result, tagging the state on a hard error. `Ok(false)`
    /// is returned as-is for the caller to convert into a soft failure.
    fn step_ok(
        &mut self,
        result: Result<bool, AutomationError>,
        tag: StepTag,
    ) -> Result<bool, AutomationError> {
        self.checkpoint()?;
        match result {
            Ok(done) => Ok(done),
            Err(err) => {
                self.state = WorkflowState::Failed(tag);
                Err(err)
            }
        }
    }

    fn checkpoint(&self) -> Result<(), AutomationError> {
        if self.cancel.is_cancelled() {
            Err(AutomationError::Cancelled("workflow run aborted".to_string()))
        } else {
            Ok(())
        }
    }

    /// Bounded poll for a secondary window matching any of `patterns`.
    /// Fixed interval, hard deadline, `Ok(None)` on timeout.
    fn poll_dialog(&mut self, patterns: &[&str]) -> Result<Option<WindowRef>, AutomationError> {
        let deadline = Instant::now() + self.timing.dialog_poll_timeout();
        loop {
            self.checkpoint()?;
            for pattern in patterns {
                if let Some(window) = self.backend.probe_result_dialog(pattern)? {
                    debug!(pattern, handle = window.handle, "dialog located");
                    return Ok(Some(window));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.timing.dialog_poll_interval());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::types::Bounds;
    use std::sync::{Arc, Mutex};

    fn test_timing() -> Timing {
        Timing {
            click_settle_ms: 0,
            surface_settle_ms: 0,
            search_settle_ms: 0,
            dialog_poll_interval_ms: 5,
            dialog_poll_timeout_ms: 25,
        }
    }

    fn window(handle: isize, title: &str) -> WindowRef {
        WindowRef {
            handle,
            title: title.to_string(),
            class_name: "Qt51514QWindowIcon".to_string(),
            bounds: Bounds { left: 0, top: 0, width: 400, height: 300 },
            display_name: None,
        }
    }

    /// Scripted adapter: records the call sequence and fails where told.
    #[derive(Default)]
    struct Script {
        activate_err: bool,
        submit_search_ok: Option<bool>,
        click_result_ok: Option<bool>,
        click_add_ok: Option<bool>,
        confirm_ok: Option<bool>,
        compose_dialog: bool,
        apply_dialog: bool,
    }

    struct ScriptedBackend {
        script: Script,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ScriptedBackend {
        fn happy(calls: Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                script: Script {
                    compose_dialog: true,
                    apply_dialog: true,
                    ..Script::default()
                },
                calls,
            }
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl WeChatBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Structural
        }
        fn connect(&mut self, _hint: Option<isize>) -> Result<WindowRef, AutomationError> {
            Ok(window(1, "WeChat"))
        }
        fn is_alive(&self) -> bool {
            true
        }
        fn activate(&mut self) -> Result<bool, AutomationError> {
            self.record("activate");
            if self.script.activate_err {
                return Err(AutomationError::PlatformError("foreground denied".to_string()));
            }
            Ok(true)
        }
        fn open_compose_surface(&mut self) -> Result<bool, AutomationError> {
            self.record("open_compose");
            Ok(true)
        }
        fn submit_search(&mut self, _text: &str) -> Result<bool, AutomationError> {
            self.record("submit_search");
            Ok(self.script.submit_search_ok.unwrap_or(true))
        }
        fn click_search_result(&mut self, _search_text: &str) -> Result<bool, AutomationError> {
            self.record("click_result");
            Ok(self.script.click_result_ok.unwrap_or(true))
        }
        fn click_add_button(&mut self, _dialog: &WindowRef) -> Result<bool, AutomationError> {
            self.record("click_add");
            Ok(self.script.click_add_ok.unwrap_or(true))
        }
        fn probe_result_dialog(
            &mut self,
            pattern: &str,
        ) -> Result<Option<WindowRef>, AutomationError> {
            let hit = if pattern.contains("申请") {
                self.script.apply_dialog
            } else {
                self.script.compose_dialog
            };
            Ok(hit.then(|| window(2, pattern)))
        }
        fn fill_field(
            &mut self,
            _dialog: &WindowRef,
            role: FieldRole,
            _text: &str,
        ) -> Result<bool, AutomationError> {
            self.record(match role {
                FieldRole::Message => "fill_message",
                FieldRole::Remark => "fill_remark",
            });
            Ok(true)
        }
        fn confirm(&mut self, _dialog: &WindowRef) -> Result<bool, AutomationError> {
            self.record("confirm");
            Ok(self.script.confirm_ok.unwrap_or(true))
        }
    }

    fn request(auto_confirm: bool) -> AddFriendRequest {
        AddFriendRequest {
            search_text: "12345".to_string(),
            nickname: "主播小王".to_string(),
            platform: "douyin".to_string(),
            message: "你好".to_string(),
            remark: None,
            auto_confirm,
        }
    }

    #[test]
    fn full_run_reaches_confirmed() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend::happy(calls.clone());
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let outcome = workflow.run(&request(true)).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.step, "done");
        assert_eq!(outcome.method, "uia");
        assert_eq!(*workflow.state(), WorkflowState::Confirmed);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "activate",
                "open_compose",
                "submit_search",
                "click_result",
                "click_add",
                "fill_message",
                "fill_remark",
                "confirm"
            ]
        );
    }

    #[test]
    fn states_advance_monotonically() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend::happy(calls);
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let before = workflow.state().rank();
        workflow.run(&request(true)).unwrap();
        assert!(workflow.state().rank() > before);
    }

    #[test]
    fn manual_confirm_stops_at_ready() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend::happy(calls.clone());
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let outcome = workflow.run(&request(false)).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.step, "ready");
        assert_eq!(outcome.message, "awaiting manual confirmation");
        assert_eq!(*workflow.state(), WorkflowState::RemarkFilled);
        assert!(!calls.lock().unwrap().contains(&"confirm"));
    }

    #[test]
    fn missing_result_surface_fails_on_click_result() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend {
            script: Script {
                compose_dialog: false,
                apply_dialog: false,
                ..Script::default()
            },
            calls,
        };
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let outcome = workflow.run(&request(true)).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.step, "click_result");
        assert_eq!(
            *workflow.state(),
            WorkflowState::Failed(StepTag::ClickResult)
        );
    }

    #[test]
    fn missing_apply_dialog_fails_on_click_add() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend {
            script: Script {
                compose_dialog: true,
                apply_dialog: false,
                ..Script::default()
            },
            calls,
        };
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let outcome = workflow.run(&request(true)).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.step, "click_add");
    }

    #[test]
    fn failed_search_carries_search_tag() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend {
            script: Script {
                submit_search_ok: Some(false),
                compose_dialog: true,
                apply_dialog: true,
                ..Script::default()
            },
            calls,
        };
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let outcome = workflow.run(&request(true)).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.step, "search");
    }

    #[test]
    fn missed_add_click_still_succeeds_when_dialog_appears() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend {
            script: Script {
                click_add_ok: Some(false),
                compose_dialog: true,
                apply_dialog: true,
                ..Script::default()
            },
            calls,
        };
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let outcome = workflow.run(&request(true)).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.step, "done");
    }

    #[test]
    fn cancelled_token_aborts_the_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend::happy(calls);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut workflow = AddFriendWorkflow::new(&mut backend, test_timing(), cancel);

        assert!(matches!(
            workflow.run(&request(true)),
            Err(AutomationError::Cancelled(_))
        ));
    }

    #[test]
    fn search_only_stops_after_submit() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend::happy(calls.clone());
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let outcome = workflow.run_search("wxid_abc").unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.step, "ready");
        assert_eq!(*workflow.state(), WorkflowState::SearchSubmitted);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["activate", "open_compose", "submit_search"]
        );
    }

    #[test]
    fn fill_reports_per_field() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend::happy(calls);
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let report = workflow.run_fill(Some("你好"), Some("小王-douyin")).unwrap();
        assert_eq!(report.message_filled, Some(true));
        assert_eq!(report.remark_filled, Some(true));
        assert_eq!(
            report.summary(),
            "verification message filled; remark set"
        );
    }

    #[test]
    fn fill_proceeds_when_foregrounding_fails() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend {
            script: Script {
                activate_err: true,
                compose_dialog: true,
                apply_dialog: true,
                ..Script::default()
            },
            calls,
        };
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let report = workflow.run_fill(Some("你好"), None).unwrap();
        assert_eq!(report.message_filled, Some(true));
    }

    #[test]
    fn fill_without_dialog_reports_failure() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut backend = ScriptedBackend {
            script: Script::default(),
            calls,
        };
        let mut workflow =
            AddFriendWorkflow::new(&mut backend, test_timing(), CancellationToken::new());

        let report = workflow.run_fill(Some("你好"), None).unwrap();
        assert_eq!(report.message_filled, Some(false));
        assert_eq!(report.remark_filled, None);
    }

    #[test]
    fn remark_composition() {
        assert_eq!(request(false).remark_text(), "主播小王-douyin");
        let mut r = request(false);
        r.remark = Some("custom".to_string());
        assert_eq!(r.remark_text(), "custom");
        r.remark = None;
        r.nickname.clear();
        assert_eq!(r.remark_text(), "");
    }
}
