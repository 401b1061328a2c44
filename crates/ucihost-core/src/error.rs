//! エラー型の定義。
//!
//! - [`EngineError`]: エンジン子プロセスの起動・入出力・局面指定の失敗
//! - [`AnalysisError`]: 解析開始 (`start_analysis`) の失敗。session へ型付きで返る
//! - [`ParseWarning`]: エンジン出力 1 行 / クライアントコマンド 1 件の解釈失敗。致命的ではない

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// 子プロセスの起動失敗、または `uciok` / `readyok` まで到達しなかった。
    #[error("engine startup failed: {0}")]
    Startup(String),

    /// handshake の待ち合わせが時間切れになった。
    #[error("engine startup timed out after {timeout:?} waiting for {waiting_for}")]
    StartupTimeout { waiting_for: &'static str, timeout: Duration },

    /// FEN の形式不正（フィールド不足 / 手番が `w` `b` 以外）。
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// 子プロセスが既に終了している。
    #[error("engine process has exited")]
    Exited,

    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// 選択済みかつ起動確認済みのエンジンが存在しない。
    #[error("no engine is selected and ready")]
    NoEngineSelected,

    /// 解析要求に開始局面 (`initialFen`) が無い。
    #[error("analysis request has no position")]
    MissingPosition,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// エンジン出力やクライアントコマンドの 1 行単位の解釈失敗。
///
/// 呼び出し側はログに残して当該行を捨てる。reader loop や受信 loop を止めてはならない。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}: `{line}`")]
pub struct ParseWarning {
    pub message: String,
    pub line: String,
}

impl ParseWarning {
    pub fn new(message: impl Into<String>, line: impl Into<String>) -> Self {
        Self { message: message.into(), line: line.into() }
    }
}
