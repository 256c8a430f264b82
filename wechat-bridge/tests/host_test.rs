//! End-to-end dispatch tests over in-memory pipes, standing in for the
//! browser side of the native-messaging channel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use wechat_automation::BridgeConfig;
use wechat_bridge::handlers::{register_all, BridgeContext};
use wechat_bridge::host::NativeMessagingHost;
use wechat_bridge::transport::{FrameReader, FrameWriter};

struct Harness {
    requests: FrameWriter<DuplexStream>,
    responses: FrameReader<DuplexStream>,
    host: tokio::task::JoinHandle<Result<(), wechat_bridge::transport::TransportError>>,
}

impl Harness {
    fn start(host: NativeMessagingHost) -> Self {
        let (client_out, host_in) = tokio::io::duplex(64 * 1024);
        let (host_out, client_in) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(host.run(host_in, host_out));
        Self {
            requests: FrameWriter::new(client_out),
            responses: FrameReader::new(client_in),
            host: task,
        }
    }

    async fn send(&mut self, message: Value) {
        self.requests.write(&message).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        self.responses.read().await.unwrap().expect("response frame")
    }

    /// Close the request pipe and wait for a clean host exit.
    async fn shutdown(self) {
        drop(self.requests);
        self.host.await.unwrap().unwrap();
    }
}

fn echo_host() -> NativeMessagingHost {
    let mut host = NativeMessagingHost::new();
    host.register("echo", |msg: Value| async move {
        Ok(json!({"echoed": msg["payload"]}))
    });
    host.register("boom", |_msg| async move {
        Err(anyhow::anyhow!("backend exploded"))
    });
    host
}

#[tokio::test]
async fn round_trips_a_request() {
    let mut harness = Harness::start(echo_host());

    harness
        .send(json!({"action": "echo", "payload": "hello"}))
        .await;
    let response = harness.recv().await;
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["echoed"], json!("hello"));

    harness.shutdown().await;
}

#[tokio::test]
async fn unknown_action_yields_error_frame() {
    let mut harness = Harness::start(echo_host());

    harness.send(json!({"action": "frobnicate"})).await;
    let response = harness.recv().await;
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error"]["code"], json!("UNKNOWN_ACTION"));

    harness.shutdown().await;
}

#[tokio::test]
async fn missing_action_yields_error_frame() {
    let mut harness = Harness::start(echo_host());

    harness.send(json!({"payload": 1})).await;
    let response = harness.recv().await;
    assert_eq!(response["error"]["code"], json!("MISSING_ACTION"));

    harness.shutdown().await;
}

#[tokio::test]
async fn handler_failure_becomes_handler_error() {
    let mut harness = Harness::start(echo_host());

    harness.send(json!({"action": "boom"})).await;
    let response = harness.recv().await;
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error"]["code"], json!("HANDLER_ERROR"));
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("backend exploded"));

    harness.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_loop_continues() {
    let mut harness = Harness::start(echo_host());

    // Correctly framed garbage, then a valid request.
    let garbage = b"not json at all";
    let mut raw = (garbage.len() as u32).to_le_bytes().to_vec();
    raw.extend_from_slice(garbage);
    harness.requests.inner_mut().write_all(&raw).await.unwrap();

    harness.send(json!({"action": "echo", "payload": 2})).await;
    let response = harness.recv().await;
    assert_eq!(response["echoed"], json!(2));

    harness.shutdown().await;
}

#[tokio::test]
async fn slow_handler_does_not_block_the_next_frame() {
    let mut host = NativeMessagingHost::new();
    host.register("slow", |_msg| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!({"which": "slow"}))
    });
    host.register("fast", |_msg| async move { Ok(json!({"which": "fast"})) });
    let mut harness = Harness::start(host);

    harness.send(json!({"action": "slow"})).await;
    harness.send(json!({"action": "fast"})).await;

    // The fast response overtakes the slow one: dispatch is concurrent.
    let first = harness.recv().await;
    assert_eq!(first["which"], json!("fast"));
    let second = harness.recv().await;
    assert_eq!(second["which"], json!("slow"));

    harness.shutdown().await;
}

#[tokio::test]
async fn inflight_handler_drains_before_shutdown() {
    let mut host = NativeMessagingHost::new();
    host.register("slow", |_msg| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!({"done": true}))
    });
    let mut harness = Harness::start(host);

    harness.send(json!({"action": "slow"})).await;
    drop(harness.requests);

    // The response still arrives even though the input pipe is closed.
    let response = harness.responses.read().await.unwrap().unwrap();
    assert_eq!(response["done"], json!(true));
    harness.host.await.unwrap().unwrap();
}

#[tokio::test]
async fn inflight_handler_drains_on_fatal_transport_error() {
    let mut host = NativeMessagingHost::new();
    host.register("slow", |_msg| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!({"done": true}))
    });
    let mut harness = Harness::start(host);

    harness.send(json!({"action": "slow"})).await;
    // A length prefix past the 1 MiB ceiling desynchronizes the stream.
    let oversized = (2u32 * 1024 * 1024).to_le_bytes();
    harness
        .requests
        .inner_mut()
        .write_all(&oversized)
        .await
        .unwrap();

    // The earlier response still goes out before the host gives up.
    let response = harness.recv().await;
    assert_eq!(response["done"], json!(true));
    assert!(matches!(
        harness.host.await.unwrap(),
        Err(wechat_bridge::transport::TransportError::Oversized(_))
    ));
}

#[tokio::test]
async fn ping_reports_version_and_backends() {
    let ctx = Arc::new(BridgeContext::new(
        BridgeConfig::default(),
        CancellationToken::new(),
    ));
    let mut host = NativeMessagingHost::new();
    register_all(&mut host, ctx);
    let mut harness = Harness::start(host);

    harness.send(json!({"action": "ping"})).await;
    let response = harness.recv().await;
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["status"], json!("ok"));
    assert!(response["version"].is_string());
    assert!(response["backends"]["uia"].is_boolean());

    harness.shutdown().await;
}

#[tokio::test]
async fn process_listing_is_always_answerable() {
    let ctx = Arc::new(BridgeContext::new(
        BridgeConfig::default(),
        CancellationToken::new(),
    ));
    let mut host = NativeMessagingHost::new();
    register_all(&mut host, ctx);
    let mut harness = Harness::start(host);

    harness.send(json!({"action": "get_wechat_processes"})).await;
    let response = harness.recv().await;
    assert_eq!(response["success"], json!(true));
    assert!(response["processes"].is_array());

    harness.shutdown().await;
}
