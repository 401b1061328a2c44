//! ucihost-server: ローカルの UCI エンジンを WebSocket クライアントへ中継する。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ucihost_core::{AnalysisCoordinator, EngineRegistry, ProtocolDispatcher, SessionRegistry};
use ucihost_server::{AppState, load_config, metrics, router};

#[derive(Parser, Debug)]
#[command(name = "ucihost-server", version, about = "Share one UCI chess engine with WebSocket clients")]
struct Cli {
    /// 設定ファイル（`.toml`、または `.json`）
    #[arg(long, default_value = "ucihost.toml")]
    config: PathBuf,

    /// 待ち受けアドレス。設定ファイルの `listen` より優先
    #[arg(long)]
    listen: Option<String>,

    /// ログのフィルタ（例: `debug`, `ucihost_core=debug`）。未指定なら `RUST_LOG`、それも無ければ `info`
    #[arg(long)]
    log_level: Option<String>,

    /// Prometheus の `/metrics` を公開するアドレス
    #[arg(long)]
    metrics_bind: Option<SocketAddr>,
}

fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to install log bridge")?;
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log filter `{level}`"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing subscriber")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c; shutting down");
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    let mut config = load_config(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(bind) = cli.metrics_bind {
        metrics::install_exporter(bind)?;
        info!(%bind, "metrics exporter listening");
    }

    let registry = Arc::new(EngineRegistry::from_config(&config));
    if registry.definitions().is_empty() {
        warn!("no engines configured; clients will receive errors");
    }
    tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.setup_engines().await }
    });

    let coordinator = Arc::new(AnalysisCoordinator::new(registry));
    let sessions = Arc::new(SessionRegistry::new(ProtocolDispatcher::new(Arc::clone(&coordinator))));
    let app = router(AppState::new(sessions, config.secret.clone()));

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("server error")?;

    coordinator.shutdown().await;
    info!("bye");
    Ok(())
}
