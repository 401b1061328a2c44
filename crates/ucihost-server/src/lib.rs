//! `ucihost-core` を WebSocket で公開するサーバ。
//!
//! 1 つの endpoint (`/`) が upgrade 要求を受け付け、`session` / `secret` クエリで
//! 接続をセッションへ紐付ける。upgrade でない要求には固定の本文を返す。

pub mod config;
pub mod error;
pub mod metrics;
pub mod server;

pub use config::load_config;
pub use error::TransportError;
pub use server::{AppState, router};
