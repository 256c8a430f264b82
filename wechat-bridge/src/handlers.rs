//! Action handlers bridging inbound messages to the automation crate.
//!
//! Backend work is blocking (COM calls plus settle sleeps), so each
//! handler pushes it onto the blocking pool. The pooled-backend mutex is
//! held for the whole run, which keeps concurrent requests against the
//! same window serialized.

use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use wechat_automation::workflow::{AddFriendRequest, AddFriendWorkflow};
use wechat_automation::{availability, discovery, BackendPool, BridgeConfig};

use crate::host::NativeMessagingHost;

pub struct BridgeContext {
    pub pool: Arc<BackendPool>,
    pub config: BridgeConfig,
    pub cancel: CancellationToken,
}

impl BridgeContext {
    pub fn new(config: BridgeConfig, cancel: CancellationToken) -> Self {
        Self {
            pool: Arc::new(BackendPool::new(config.clone())),
            config,
            cancel,
        }
    }
}

/// Wire every supported action into the host's handler table.
pub fn register_all(host: &mut NativeMessagingHost, ctx: Arc<BridgeContext>) {
    let c = ctx.clone();
    host.register("ping", move |msg| ping(c.clone(), msg));
    let c = ctx.clone();
    host.register("get_wechat_windows", move |msg| get_windows(c.clone(), msg));
    let c = ctx.clone();
    host.register("get_wechat_processes", move |msg| {
        get_processes(c.clone(), msg)
    });
    let c = ctx.clone();
    host.register("check_wechat_status", move |msg| check_status(c.clone(), msg));
    let c = ctx.clone();
    host.register("add_friend", move |msg| add_friend(c.clone(), msg));
    let c = ctx.clone();
    host.register("search_wechat", move |msg| search_wechat(c.clone(), msg));
    let c = ctx.clone();
    host.register("fill_friend_info", move |msg| {
        fill_friend_info(c.clone(), msg)
    });
    host.register("highlight_window", move |msg| {
        highlight_window(ctx.clone(), msg)
    });
}

fn parse<T: for<'de> Deserialize<'de>>(message: Value) -> anyhow::Result<T> {
    serde_json::from_value(message).context("invalid request parameters")
}

/// Failing to reach a WeChat window at all is a workflow outcome the
/// extension shows to the user, not a host error.
fn connect_failure(err: &anyhow::Error) -> Option<Value> {
    use wechat_automation::AutomationError;
    match err.downcast_ref::<AutomationError>() {
        Some(
            AutomationError::WindowNotFound(msg)
            | AutomationError::BackendUnavailable(msg)
            | AutomationError::UnsupportedPlatform(msg),
        ) => Some(json!({
            "success": false,
            "step": "connect",
            "message": msg,
        })),
        _ => None,
    }
}

async fn ping(_ctx: Arc<BridgeContext>, _message: Value) -> anyhow::Result<Value> {
    let backends = availability();
    Ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "automation_available": backends.any(),
        "backends": backends,
    }))
}

async fn get_windows(_ctx: Arc<BridgeContext>, _message: Value) -> anyhow::Result<Value> {
    let windows = tokio::task::spawn_blocking(discovery::list_wechat_windows).await??;
    Ok(json!({"count": windows.len(), "windows": windows}))
}

async fn get_processes(_ctx: Arc<BridgeContext>, _message: Value) -> anyhow::Result<Value> {
    let processes = tokio::task::spawn_blocking(discovery::list_wechat_processes).await?;
    Ok(json!({"count": processes.len(), "processes": processes}))
}

async fn check_status(_ctx: Arc<BridgeContext>, _message: Value) -> anyhow::Result<Value> {
    let report = tokio::task::spawn_blocking(discovery::check_status).await?;
    Ok(serde_json::to_value(report)?)
}

#[derive(Debug, Deserialize)]
struct AddFriendParams {
    #[serde(default)]
    wechat_id: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    message: String,
    remark: Option<String>,
    hwnd: Option<isize>,
    auto_confirm: Option<bool>,
}

async fn add_friend(ctx: Arc<BridgeContext>, message: Value) -> anyhow::Result<Value> {
    let params: AddFriendParams = parse(message)?;
    if params.wechat_id.is_empty() {
        bail!("missing wechat_id parameter");
    }

    let request = AddFriendRequest {
        search_text: params.wechat_id.clone(),
        nickname: params.nickname,
        platform: params.platform,
        message: params.message,
        remark: params.remark,
        auto_confirm: params.auto_confirm.unwrap_or(ctx.config.auto_confirm),
    };
    info!(wechat_id = %params.wechat_id, "add_friend requested");

    match run_blocking(ctx, params.hwnd, move |workflow| workflow.run(&request)).await {
        Ok(outcome) => Ok(serde_json::to_value(outcome)?),
        Err(err) => connect_failure(&err).ok_or(err),
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    wechat_id: String,
    window_handle: Option<isize>,
}

async fn search_wechat(ctx: Arc<BridgeContext>, message: Value) -> anyhow::Result<Value> {
    let params: SearchParams = parse(message)?;
    if params.wechat_id.is_empty() {
        bail!("missing wechat_id parameter");
    }

    let text = params.wechat_id;
    match run_blocking(ctx, params.window_handle, move |workflow| {
        workflow.run_search(&text)
    })
    .await
    {
        Ok(outcome) => Ok(serde_json::to_value(outcome)?),
        Err(err) => connect_failure(&err).ok_or(err),
    }
}

#[derive(Debug, Deserialize)]
struct FillParams {
    message: Option<String>,
    remark: Option<String>,
    window_handle: Option<isize>,
}

async fn fill_friend_info(ctx: Arc<BridgeContext>, message: Value) -> anyhow::Result<Value> {
    let params: FillParams = parse(message)?;

    let report = match run_blocking(ctx, params.window_handle, move |workflow| {
        workflow.run_fill(params.message.as_deref(), params.remark.as_deref())
    })
    .await
    {
        Ok(report) => report,
        Err(err) => return connect_failure(&err).ok_or(err),
    };

    let summary = report.summary();
    let mut frame = serde_json::to_value(&report)?;
    frame["message"] = json!(summary);
    Ok(frame)
}

#[derive(Debug, Deserialize)]
struct HighlightParams {
    window_handle: Option<isize>,
}

async fn highlight_window(_ctx: Arc<BridgeContext>, message: Value) -> anyhow::Result<Value> {
    let params: HighlightParams = parse(message)?;
    let handle = match params.window_handle {
        Some(handle) => handle,
        None => bail!("missing window_handle parameter"),
    };

    tokio::task::spawn_blocking(move || discovery::highlight_window(handle)).await??;
    Ok(json!({"message": "window highlighted"}))
}

/// Acquire a pooled backend and run `f` against it on the blocking pool.
async fn run_blocking<T, F>(
    ctx: Arc<BridgeContext>,
    hint: Option<isize>,
    f: F,
) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut AddFriendWorkflow<'_>) -> Result<T, wechat_automation::AutomationError>
        + Send
        + 'static,
{
    let timing = ctx.config.timing.clone();
    let cancel = ctx.cancel.clone();
    tokio::task::spawn_blocking(move || {
        let entry = ctx.pool.acquire(hint)?;
        let mut pooled = entry
            .lock()
            .map_err(|_| wechat_automation::AutomationError::Internal(
                "pooled backend poisoned".to_string(),
            ))?;
        let mut workflow = AddFriendWorkflow::new(pooled.backend.as_mut(), timing, cancel);
        f(&mut workflow)
    })
    .await?
    .map_err(Into::into)
}
