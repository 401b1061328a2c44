//! セッションから呼ばれる入口（`uci` ヘッダ、`isready`、`stop`、解析開始）。状態は持たない。

use std::sync::Arc;

use crate::coordinator::AnalysisCoordinator;
use crate::engine::AnalysisSink;
use crate::error::{AnalysisError, EngineError};
use crate::registry::EngineRegistry;
use crate::request::{AnalysisRequest, SearchLimits};

#[derive(Clone)]
pub struct ProtocolDispatcher {
    coordinator: Arc<AnalysisCoordinator>,
}

impl ProtocolDispatcher {
    pub fn new(coordinator: Arc<AnalysisCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<AnalysisCoordinator> {
        &self.coordinator
    }

    fn registry(&self) -> &Arc<EngineRegistry> {
        self.coordinator.registry()
    }

    /// probe 中なら handshake の上限時間まで終わるのを待つ。
    async fn wait_setup(&self) {
        let registry = self.registry();
        if !registry.is_setup_done() {
            registry.wait_setup(registry.settings().handshake_timeout()).await;
        }
    }

    /// `uci` への応答行。`id name` には設定ファイル上の名前を使う。
    pub async fn uci_header(&self) -> Result<Vec<String>, AnalysisError> {
        self.wait_setup().await;
        let definition = self.registry().current().ok_or(AnalysisError::NoEngineSelected)?;
        let probe = definition.probe().ok_or(AnalysisError::NoEngineSelected)?;

        let mut lines = Vec::with_capacity(probe.options.len() + 3);
        lines.push(format!("id name {}", definition.name));
        lines.push(format!("id author {}", probe.uci_author.as_deref().unwrap_or_default()));
        lines.extend(probe.options.iter().map(|opt| opt.to_uci_line()));
        lines.push("uciok".to_string());
        Ok(lines)
    }

    /// `isready` への応答。使えるエンジンがあれば `readyok`。
    pub async fn is_ready(&self) -> Result<&'static str, AnalysisError> {
        self.wait_setup().await;
        self.registry().current().map(|_| "readyok").ok_or(AnalysisError::NoEngineSelected)
    }

    pub async fn start_analysis(
        &self,
        request: &AnalysisRequest,
        options: &[(String, String)],
        limits: SearchLimits,
        sink: AnalysisSink,
    ) -> Result<(), AnalysisError> {
        self.coordinator.start_analysis(request, options, limits, sink).await
    }

    /// セッションが現在の解析の持ち主なら止める。
    pub async fn stop(&self, session: &str) -> Result<bool, EngineError> {
        self.coordinator.stop_for_session(session).await
    }
}
