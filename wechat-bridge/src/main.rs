use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use wechat_bridge::handlers::{register_all, BridgeContext};
use wechat_bridge::host::NativeMessagingHost;
use wechat_automation::{profile_for_version, BridgeConfig};

/// Chrome native-messaging host that automates the WeChat desktop client.
///
/// Launched by the browser with stdin/stdout bound to the extension, so
/// stdout carries frames only; all diagnostics go to stderr and the log
/// file.
#[derive(Debug, Parser)]
#[command(name = "wechat-bridge", version)]
struct Args {
    /// Directory for the rolling diagnostic log file.
    #[arg(long, env = "WECHAT_BRIDGE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log verbosity (error, warn, info, debug).
    #[arg(long, env = "WECHAT_BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Send friend requests without the manual confirmation pause.
    #[arg(long)]
    auto_confirm: bool,

    /// Target WeChat version, selects the coordinate profile.
    #[arg(long, env = "WECHAT_BRIDGE_WECHAT_VERSION", default_value = "4")]
    wechat_version: String,
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = match args.log_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        _ => Level::INFO,
    };
    let filter = || EnvFilter::from_default_env().add_directive(level.into());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_filter(filter());

    match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "wechat_bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    let config = BridgeConfig {
        auto_confirm: args.auto_confirm,
        profile: profile_for_version(&args.wechat_version),
        ..BridgeConfig::default()
    };
    info!(version = env!("CARGO_PKG_VERSION"), auto_confirm = config.auto_confirm, "starting");

    let cancel = CancellationToken::new();
    let ctx = Arc::new(BridgeContext::new(config, cancel.clone()));

    let mut host = NativeMessagingHost::new();
    register_all(&mut host, ctx.clone());

    // Chrome closes the pipe on extension shutdown, which ends the read
    // loop; Ctrl+C only interrupts in-flight workflows.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling running workflows");
            cancel.cancel();
        }
    });

    host.run(tokio::io::stdin(), tokio::io::stdout()).await?;
    ctx.pool.clear();
    Ok(())
}
