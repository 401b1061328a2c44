//! HTTP / WebSocket endpoint。
//!
//! 1 接続につき 1 task。受信ループはセッションへ 1 メッセージずつ渡し、
//! 送信はセッションからの mpsc を書き込み側が drain する。
//! task 内の panic は `catch_unwind` で止め、接続 1 本の切断に留める。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use ucihost_core::{Session, SessionRegistry};

use crate::error::TransportError;
use crate::metrics;

/// upgrade でない要求への本文。
pub const PLAIN_RESPONSE: &str = "ucihost";

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionRegistry>,
    secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionRegistry>, secret: Option<String>) -> Self {
        Self { sessions, secret: secret.filter(|s| !s.is_empty()).map(Arc::from) }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }
}

/// upgrade 時のクエリ。
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub session: Option<String>,
    pub secret: Option<String>,
}

impl ConnectParams {
    /// 必須項目を確かめ、セッション ID を返す。
    /// `expected` が設定されていれば `secret` が一致しなければならない。
    pub fn validate(&self, expected: Option<&str>) -> Result<String, TransportError> {
        let session = non_blank(&self.session).ok_or(TransportError::MissingParameter("session"))?;
        let secret = non_blank(&self.secret).ok_or(TransportError::MissingParameter("secret"))?;
        match expected {
            Some(expected) if expected != secret => Err(TransportError::SecretMismatch),
            _ => Ok(session.to_string()),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(connect)).with_state(state)
}

async fn connect(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return (StatusCode::OK, PLAIN_RESPONSE).into_response();
    };
    let session_id = match params.validate(state.secret.as_deref()) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "rejecting websocket upgrade");
            return e.into_response();
        }
    };
    upgrade.on_upgrade(move |socket| serve_connection(state, session_id, socket))
}

async fn serve_connection(state: AppState, session_id: String, socket: WebSocket) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (session, conn_id) = state.sessions.attach(&session_id, tx);
    metrics::connection_opened(state.sessions.len());
    info!(session = %session_id, conn = conn_id, "connection opened");

    match AssertUnwindSafe(run_connection(&session, socket, rx)).catch_unwind().await {
        Ok(Ok(())) => debug!(session = %session_id, conn = conn_id, "connection finished"),
        Ok(Err(e)) => warn!(session = %session_id, conn = conn_id, error = %e, "connection failed"),
        Err(_) => error!(session = %session_id, conn = conn_id, "connection task panicked"),
    }

    state.sessions.detach(&session_id, conn_id).await;
    metrics::connection_closed(state.sessions.len());
    info!(session = %session_id, conn = conn_id, "connection closed");
}

async fn run_connection(
    session: &Arc<Session>,
    socket: WebSocket,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> Result<(), TransportError> {
    let (mut sink, mut stream) = socket.split();

    let writer = async {
        while let Some(text) = outbound.recv().await {
            sink.send(Message::Text(text.into())).await?;
        }
        Ok::<(), TransportError>(())
    };

    let reader = async {
        while let Some(frame) = stream.next().await {
            match frame? {
                Message::Text(text) => {
                    metrics::message_received();
                    session.on_message(text.as_str()).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok::<(), TransportError>(())
    };

    tokio::select! {
        result = writer => result,
        result = reader => result,
    }
}
