//! 接続単位のエラー。1 接続を閉じるだけで、同じセッションの他の接続には影響しない。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// upgrade 要求に必須のクエリ (`session` / `secret`) が無いか空。
    #[error("missing query parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("secret does not match")]
    SecretMismatch,

    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            TransportError::SecretMismatch => StatusCode::FORBIDDEN,
            TransportError::WebSocket(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
