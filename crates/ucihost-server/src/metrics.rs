//! Prometheus 向けの接続メトリクス。
//!
//! recorder 未 install 時は `metrics` の各マクロが NoOp になるので、
//! `--metrics-bind` 無しの起動でもそのまま呼んでよい。

use std::net::SocketAddr;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;

pub const CONNECTIONS_TOTAL: &str = "ucihost_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "ucihost_connections_active";
pub const MESSAGES_RECEIVED_TOTAL: &str = "ucihost_messages_received_total";
pub const SESSIONS_ACTIVE: &str = "ucihost_sessions_active";

/// `bind` で `/metrics` を返す HTTP listener 付きの recorder を install する。
pub fn install_exporter(bind: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(bind)
        .install()
        .with_context(|| format!("failed to install Prometheus exporter on {bind}"))
}

pub fn connection_opened(sessions: usize) {
    metrics::counter!(CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    metrics::gauge!(SESSIONS_ACTIVE).set(sessions as f64);
}

pub fn connection_closed(sessions: usize) {
    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    metrics::gauge!(SESSIONS_ACTIVE).set(sessions as f64);
}

pub fn message_received() {
    metrics::counter!(MESSAGES_RECEIVED_TOTAL).increment(1);
}
