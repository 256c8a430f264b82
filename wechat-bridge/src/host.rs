//! Dispatch host: the long-lived read loop plus the handler table.
//!
//! One task per inbound frame, so a multi-second automation run never
//! blocks the next read. The handler table is append-only before `run`
//! starts; after that it is shared read-only. Handler failures become
//! error frames, never loop exits: only end-of-stream (or a
//! desynchronized stream) stops the host.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::transport::{FrameReader, FrameWriter, TransportError};

pub const CODE_MISSING_ACTION: &str = "MISSING_ACTION";
pub const CODE_UNKNOWN_ACTION: &str = "UNKNOWN_ACTION";
pub const CODE_HANDLER_ERROR: &str = "HANDLER_ERROR";

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;
type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct NativeMessagingHost {
    handlers: HashMap<String, Handler>,
}

impl NativeMessagingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `action`. Last registration wins.
    pub fn register<F, Fut>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let action = action.into();
        debug!(action, "handler registered");
        self.handlers
            .insert(action, Arc::new(move |msg| Box::pin(handler(msg))));
    }

    pub fn actions(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Run the read loop until end-of-stream. In-flight handlers are
    /// drained before returning so their responses still go out.
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handlers = Arc::new(self.handlers);
        let writer = Arc::new(Mutex::new(FrameWriter::new(writer)));
        let mut reader = FrameReader::new(reader);
        let mut inflight = JoinSet::new();

        info!(actions = handlers.len(), "native messaging host started");
        loop {
            match reader.read().await {
                Ok(Some(message)) => {
                    let handlers = handlers.clone();
                    let writer = writer.clone();
                    inflight.spawn(dispatch(handlers, writer, message));
                }
                Ok(None) => {
                    info!("end of stream, shutting down");
                    break;
                }
                Err(err) if err.is_recoverable() => {
                    warn!(%err, "dropping malformed frame");
                }
                Err(err) => {
                    // Responses for frames read before the failure still
                    // go out before the host gives up.
                    error!(%err, "transport failure");
                    while inflight.join_next().await.is_some() {}
                    return Err(err);
                }
            }
            // Reap finished handlers so the set does not grow unbounded.
            while inflight.try_join_next().is_some() {}
        }

        while inflight.join_next().await.is_some() {}
        Ok(())
    }
}

async fn dispatch<W: AsyncWrite + Unpin>(
    handlers: Arc<HashMap<String, Handler>>,
    writer: Arc<Mutex<FrameWriter<W>>>,
    message: Value,
) {
    let response = match message.get("action").and_then(Value::as_str) {
        None => error_frame(CODE_MISSING_ACTION, "message carries no action field"),
        Some(action) => match handlers.get(action) {
            None => error_frame(CODE_UNKNOWN_ACTION, &format!("no handler for action {action}")),
            Some(handler) => {
                let action = action.to_string();
                debug!(action, "dispatching");
                match handler(message.clone()).await {
                    Ok(data) => success_frame(data),
                    Err(err) => {
                        warn!(action, %err, "handler failed");
                        error_frame(CODE_HANDLER_ERROR, &format!("{err:#}"))
                    }
                }
            }
        },
    };

    if let Err(err) = writer.lock().await.write(&response).await {
        error!(%err, "failed to write response frame");
    }
}

/// Wrap handler output. An object result is merged over
/// `{success:true, message:"ok"}` so handlers can override either field;
/// anything else is carried under `data`; `null` becomes a bare
/// acknowledgement.
fn success_frame(data: Value) -> Value {
    match data {
        Value::Null => json!({"success": true}),
        Value::Object(fields) => {
            let mut response = serde_json::Map::new();
            response.insert("success".to_string(), Value::Bool(true));
            response.insert("message".to_string(), Value::String("ok".to_string()));
            response.extend(fields);
            Value::Object(response)
        }
        other => json!({"success": true, "message": "ok", "data": other}),
    }
}

fn error_frame(code: &str, message: &str) -> Value {
    json!({
        "success": false,
        "error": {"code": code, "message": message},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_frame_merges_objects() {
        let frame = success_frame(json!({"count": 2, "message": "ok"}));
        assert_eq!(frame["success"], json!(true));
        assert_eq!(frame["count"], json!(2));
        assert_eq!(frame["message"], json!("ok"));
    }

    #[test]
    fn handler_supplied_success_wins() {
        let frame = success_frame(json!({"success": false, "step": "search"}));
        assert_eq!(frame["success"], json!(false));
        assert_eq!(frame["step"], json!("search"));
    }

    #[test]
    fn object_without_message_gets_the_default() {
        let frame = success_frame(json!({"count": 0}));
        assert_eq!(frame["message"], json!("ok"));
    }

    #[test]
    fn scalar_result_lands_under_data() {
        let frame = success_frame(json!(42));
        assert_eq!(frame, json!({"success": true, "message": "ok", "data": 42}));
    }

    #[test]
    fn null_result_is_a_bare_ack() {
        assert_eq!(success_frame(Value::Null), json!({"success": true}));
    }

    #[test]
    fn error_frame_shape() {
        let frame = error_frame(CODE_UNKNOWN_ACTION, "no handler for action nope");
        assert_eq!(frame["success"], json!(false));
        assert_eq!(frame["error"]["code"], json!("UNKNOWN_ACTION"));
    }
}
