//! プロセス全体で 1 つのエンジンを共有し、同時に走る解析を高々 1 本に保つ。
//!
//! エンジンの保持と「現在の解析の持ち主」は 1 つの非同期 Mutex の下にあり、
//! 「前の解析を止める → 設定し直す → 次を開始する」を 1 つの区間で行う。

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::engine::{AnalysisSink, UciEngine};
use crate::error::{AnalysisError, EngineError};
use crate::registry::{EngineDefinition, EngineRegistry};
use crate::request::{AnalysisRequest, SearchLimits};

#[derive(Default)]
struct EngineSlot {
    engine: Option<UciEngine>,
    /// `engine` を起動したエンジン定義の名前
    engine_name: Option<String>,
    /// 現在の解析を開始したセッション
    owner: Option<String>,
}

pub struct AnalysisCoordinator {
    registry: Arc<EngineRegistry>,
    slot: Mutex<EngineSlot>,
}

impl AnalysisCoordinator {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self { registry, slot: Mutex::new(EngineSlot::default()) }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// 解析を開始する。走っている解析があれば先に止め、その `bestmove` は前の持ち主へ届く。
    ///
    /// `options` はセッションの `setoption` で溜めた値で、リクエスト由来の設定の後に送る。
    pub async fn start_analysis(
        &self,
        request: &AnalysisRequest,
        options: &[(String, String)],
        limits: SearchLimits,
        sink: AnalysisSink,
    ) -> Result<(), AnalysisError> {
        let fen = request.fen().ok_or(AnalysisError::MissingPosition)?;
        let definition = self.registry.current().ok_or(AnalysisError::NoEngineSelected)?;

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        let result = self.start_locked(slot, &definition, request, fen, options, limits, sink).await;
        match &result {
            Ok(()) => {
                slot.owner = request.session.clone();
                debug!(
                    "analysis started for session {}",
                    request.session.as_deref().unwrap_or("-")
                );
            }
            Err(e) => {
                warn!("failed to start analysis: {}", e);
                slot.owner = None;
                if matches!(e, AnalysisError::Engine(err) if !matches!(err, EngineError::InvalidPosition(_)))
                {
                    if let Some(engine) = slot.engine.take() {
                        engine.dispose().await;
                    }
                    slot.engine_name = None;
                }
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_locked(
        &self,
        slot: &mut EngineSlot,
        definition: &EngineDefinition,
        request: &AnalysisRequest,
        fen: &str,
        options: &[(String, String)],
        limits: SearchLimits,
        sink: AnalysisSink,
    ) -> Result<(), AnalysisError> {
        let settings = self.registry.settings();
        let reusable = match slot.engine.as_mut() {
            Some(engine) => {
                engine.is_alive() && slot.engine_name.as_deref() == Some(definition.name.as_str())
            }
            None => false,
        };
        if !reusable {
            if let Some(old) = slot.engine.take() {
                info!("restarting engine `{}`", old.label());
                old.dispose().await;
            }
            let engine =
                UciEngine::start(&definition.resolved_path, definition.name.clone(), settings).await?;
            slot.engine = Some(engine);
            slot.engine_name = Some(definition.name.clone());
        }
        let engine = slot.engine.as_mut().ok_or(EngineError::Exited)?;

        if engine.is_analyzing() {
            engine.stop().await?;
            if !engine.wait_idle(settings.stop_timeout()).await {
                warn!(
                    "[engine:{}] no bestmove within {:?} after stop",
                    engine.label(),
                    settings.stop_timeout()
                );
            }
        }

        if request.uci_new_game {
            engine.new_game().await?;
        }
        let multipv = request.multipv.unwrap_or(settings.multipv);
        engine.set_option("MultiPV", &multipv.to_string()).await?;
        for (name, value) in request.engine_options().iter().chain(options) {
            engine.set_option(name, value).await?;
        }
        engine.set_fen_and_moves(fen, &request.moves).await?;

        engine.set_sink(Some(sink));
        engine.go(&limits).await?;
        Ok(())
    }

    /// 走っている解析を止める。エンジンが無ければ何もしない。
    pub async fn stop_analysis(&self) -> Result<(), EngineError> {
        let mut slot = self.slot.lock().await;
        match slot.engine.as_mut() {
            Some(engine) => engine.stop().await,
            None => Ok(()),
        }
    }

    /// `session` が現在の解析の持ち主であるときだけ止める。止めたら `true`。
    pub async fn stop_for_session(&self, session: &str) -> Result<bool, EngineError> {
        let mut slot = self.slot.lock().await;
        if slot.owner.as_deref() != Some(session) {
            return Ok(false);
        }
        slot.owner = None;
        match slot.engine.as_mut() {
            Some(engine) => engine.stop().await.map(|()| true),
            None => Ok(false),
        }
    }

    pub async fn current_owner(&self) -> Option<String> {
        self.slot.lock().await.owner.clone()
    }

    /// 保持しているエンジンを終了させる。
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        slot.owner = None;
        slot.engine_name = None;
        if let Some(engine) = slot.engine.take() {
            info!("disposing engine `{}`", engine.label());
            engine.dispose().await;
        }
    }
}
