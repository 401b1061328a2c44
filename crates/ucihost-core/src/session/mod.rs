//! セッション単位のコマンド解釈。
//!
//! 1 つのセッションには複数の接続 (transport) が紐付きうる。受信したコマンドで
//! 保留中の解析要求を組み立て、`go` で確定して coordinator に渡す。
//! 解析の出力はセッションの全接続へ配信する。

pub mod command;
pub mod relay;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::dispatcher::ProtocolDispatcher;
use crate::engine::AnalysisEvent;
use crate::error::AnalysisError;
use crate::request::{AnalysisRequest, SearchLimits};
use crate::util::lock_or_recover;

pub use command::ClientCommand;
pub use relay::{Relay, RelayMode, StalenessFilter};

/// 接続への送信口。接続側の書き込みタスクが受け取って送る。
pub type TransportSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Default)]
struct PendingState {
    request: Option<AnalysisRequest>,
    /// `setoption` で受け取った値（受信順、同名は上書き）
    options: Vec<(String, String)>,
}

pub struct Session {
    id: String,
    dispatcher: ProtocolDispatcher,
    pending: Mutex<PendingState>,
    transports: Mutex<HashMap<u64, TransportSender>>,
    /// 最後に受け付けた解析開始の番号
    latest_dispatch: AtomicU64,
    /// 解析開始を 1 つずつ coordinator へ渡すためのロック
    start_lock: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(id: impl Into<String>, dispatcher: ProtocolDispatcher) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            dispatcher,
            pending: Mutex::new(PendingState::default()),
            transports: Mutex::new(HashMap::new()),
            latest_dispatch: AtomicU64::new(0),
            start_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attach(&self, conn_id: u64, sender: TransportSender) {
        lock_or_recover(&self.transports).insert(conn_id, sender);
    }

    /// 接続を外す。残りが無くなれば `true`。
    pub fn detach(&self, conn_id: u64) -> bool {
        let mut transports = lock_or_recover(&self.transports);
        transports.remove(&conn_id);
        transports.is_empty()
    }

    pub fn transport_count(&self) -> usize {
        lock_or_recover(&self.transports).len()
    }

    /// 全接続へ送る。閉じた接続は外すが、他の接続への送信は続ける。
    pub fn broadcast(&self, message: &str) {
        let mut transports = lock_or_recover(&self.transports);
        transports.retain(|conn_id, sender| {
            let open = sender.send(message.to_string()).is_ok();
            if !open {
                debug!("session {}: dropping closed connection {}", self.id, conn_id);
            }
            open
        });
    }

    fn send_error(&self, mode: RelayMode, error: &AnalysisError) {
        let message = match mode {
            RelayMode::Uci => format!("info string error {error}"),
            RelayMode::Json => serde_json::json!({ "error": error.to_string() }).to_string(),
        };
        self.broadcast(&message);
    }

    /// 受信メッセージ 1 件を処理する。解析の開始は別タスクで行い、ここでは待たない。
    pub async fn on_message(self: &Arc<Self>, message: &str) {
        let command = match ClientCommand::parse(message) {
            Ok(command) => command,
            Err(warning) => {
                debug!("session {}: ignoring message: {}", self.id, warning);
                return;
            }
        };

        match command {
            ClientCommand::Uci => match self.dispatcher.uci_header().await {
                Ok(lines) => lines.iter().for_each(|line| self.broadcast(line)),
                Err(e) => self.send_error(RelayMode::Uci, &e),
            },
            ClientCommand::IsReady => match self.dispatcher.is_ready().await {
                Ok(reply) => self.broadcast(reply),
                Err(e) => self.send_error(RelayMode::Uci, &e),
            },
            ClientCommand::SetOption { name, value } => {
                let mut pending = lock_or_recover(&self.pending);
                let existing = pending.options.iter().position(|(n, _)| n.eq_ignore_ascii_case(&name));
                match existing {
                    Some(pos) => pending.options[pos].1 = value,
                    None => pending.options.push((name, value)),
                }
            }
            ClientCommand::UciNewGame => {
                let mut pending = lock_or_recover(&self.pending);
                self.pending_request(&mut pending).uci_new_game = true;
            }
            ClientCommand::Position { fen, moves } => {
                let mut pending = lock_or_recover(&self.pending);
                let request = self.pending_request(&mut pending);
                request.initial_fen = Some(fen);
                request.moves = moves;
            }
            ClientCommand::Go(limits) => {
                let taken = {
                    let mut pending = lock_or_recover(&self.pending);
                    let options = std::mem::take(&mut pending.options);
                    pending.request.take().map(|request| (request, options))
                };
                match taken {
                    Some((request, options)) => self.dispatch(request, options, limits),
                    None => debug!("session {}: go without position", self.id),
                }
            }
            ClientCommand::Stop => {
                if let Err(e) = self.dispatcher.stop(&self.id).await {
                    warn!("session {}: stop failed: {}", self.id, e);
                }
            }
            ClientCommand::Request(mut request) => {
                if request.fen().is_none() {
                    self.send_error(RelayMode::Json, &AnalysisError::MissingPosition);
                    return;
                }
                request.session = Some(self.id.clone());
                request.verbose_evaluation = true;
                let limits = request.search_limits();
                self.dispatch(request, Vec::new(), limits);
            }
        }
    }

    fn pending_request<'a>(&self, pending: &'a mut PendingState) -> &'a mut AnalysisRequest {
        pending.request.get_or_insert_with(|| AnalysisRequest::for_session(&self.id))
    }

    /// 解析を開始し、その出力を全接続へ流し続けるタスクを起こす。
    ///
    /// 出力形式は `verbose_evaluation` で決まる。
    /// 開始前により新しい解析要求が届いていれば、この要求は捨てる。
    fn dispatch(self: &Arc<Self>, request: AnalysisRequest, options: Vec<(String, String)>, limits: SearchLimits) {
        let mode = RelayMode::for_request(&request);
        let seq = self.latest_dispatch.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let (sink, mut events) = mpsc::unbounded_channel();
            {
                let _start = session.start_lock.lock().await;
                if session.latest_dispatch.load(Ordering::SeqCst) != seq {
                    debug!("session {}: dropping superseded analysis request {}", session.id, seq);
                    return;
                }
                if let Err(e) = session.dispatcher.start_analysis(&request, &options, limits, sink).await {
                    session.send_error(mode, &e);
                    return;
                }
            }

            let mut relay = Relay::new(mode);
            while let Some(event) = events.recv().await {
                let finished = matches!(event, AnalysisEvent::BestMove(_));
                for message in relay.render(event) {
                    session.broadcast(&message);
                }
                if finished {
                    break;
                }
            }
            debug!("session {}: analysis relay finished", session.id);
        });
    }
}

/// セッション ID → セッションの表。
pub struct SessionRegistry {
    dispatcher: ProtocolDispatcher,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    next_conn_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(dispatcher: ProtocolDispatcher) -> Self {
        Self { dispatcher, sessions: Mutex::new(HashMap::new()), next_conn_id: AtomicU64::new(1) }
    }

    pub fn dispatcher(&self) -> &ProtocolDispatcher {
        &self.dispatcher
    }

    /// 接続をセッションに紐付ける。セッションが無ければ作る。
    pub fn attach(&self, session_id: &str, sender: TransportSender) -> (Arc<Session>, u64) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = lock_or_recover(&self.sessions);
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!("session {} created", session_id);
                Session::new(session_id, self.dispatcher.clone())
            })
            .clone();
        session.attach(conn_id, sender);
        (session, conn_id)
    }

    /// 接続を外す。最後の接続だったらセッションを破棄し、その解析を止める。
    pub async fn detach(&self, session_id: &str, conn_id: u64) {
        let removed = {
            let mut sessions = lock_or_recover(&self.sessions);
            let empty = sessions.get(session_id).is_some_and(|s| s.detach(conn_id));
            if empty {
                sessions.remove(session_id);
            }
            empty
        };
        if removed {
            info!("session {} closed", session_id);
            if let Err(e) = self.dispatcher.stop(session_id).await {
                warn!("session {}: stop on close failed: {}", session_id, e);
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        lock_or_recover(&self.sessions).get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_or_recover(&self.sessions).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::coordinator::AnalysisCoordinator;
    use crate::registry::EngineRegistry;

    fn registry_without_engines() -> SessionRegistry {
        let engines = Arc::new(EngineRegistry::from_config(&HostConfig::default()));
        let coordinator = Arc::new(AnalysisCoordinator::new(engines));
        SessionRegistry::new(ProtocolDispatcher::new(coordinator))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("transport closed")
    }

    #[tokio::test]
    async fn pending_state_is_built_across_messages_and_taken_by_go() {
        let sessions = registry_without_engines();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (session, _) = sessions.attach("s1", tx);

        session.on_message("setoption name Threads value 2").await;
        session.on_message("setoption name threads value 4").await;
        session.on_message("ucinewgame").await;
        session.on_message("position startpos moves e2e4").await;
        {
            let pending = lock_or_recover(&session.pending);
            assert_eq!(pending.options, vec![("Threads".to_string(), "4".to_string())]);
            let request = pending.request.as_ref().unwrap();
            assert!(request.uci_new_game);
            assert_eq!(request.moves, vec!["e2e4"]);
            assert_eq!(request.session.as_deref(), Some("s1"));
        }

        session.on_message("go infinite").await;
        let pending = lock_or_recover(&session.pending);
        assert!(pending.request.is_none());
        assert!(pending.options.is_empty());
    }

    #[tokio::test]
    async fn failures_are_reported_as_error_frames() {
        let sessions = registry_without_engines();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (session, _) = sessions.attach("s1", tx);

        session.on_message("uci").await;
        assert_eq!(next(&mut rx).await, "info string error no engine is selected and ready");

        session.on_message("position startpos").await;
        session.on_message("go depth 5").await;
        assert_eq!(next(&mut rx).await, "info string error no engine is selected and ready");

        session.on_message(r#"{"moves":["e2e4"]}"#).await;
        let frame: serde_json::Value = serde_json::from_str(&next(&mut rx).await).unwrap();
        assert_eq!(frame["error"], "analysis request has no position");
    }

    #[tokio::test]
    async fn superseded_go_is_dropped_before_reaching_the_coordinator() {
        let sessions = registry_without_engines();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (session, _) = sessions.attach("s1", tx);

        // current_thread runtime なので、2 つの dispatch はどちらもまだ走っていない
        session.on_message("position startpos").await;
        session.on_message("go depth 5").await;
        session.on_message("position startpos moves e2e4").await;
        session.on_message("go depth 5").await;

        assert_eq!(next(&mut rx).await, "info string error no engine is selected and ready");
        let extra = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err(), "only the newest request should be dispatched");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_transport_and_skips_closed_ones() {
        let sessions = registry_without_engines();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        let (session, _) = sessions.attach("shared", tx1);
        sessions.attach("shared", tx2);
        sessions.attach("shared", tx3);
        drop(rx2);

        session.broadcast("readyok");
        assert_eq!(next(&mut rx1).await, "readyok");
        assert_eq!(next(&mut rx3).await, "readyok");
        assert_eq!(session.transport_count(), 2);
    }

    #[tokio::test]
    async fn session_is_removed_with_its_last_transport() {
        let sessions = registry_without_engines();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (_, conn1) = sessions.attach("s", tx1);
        let (_, conn2) = sessions.attach("s", tx2);
        assert_eq!(sessions.len(), 1);

        sessions.detach("s", conn1).await;
        assert!(sessions.get("s").is_some());
        sessions.detach("s", conn2).await;
        assert!(sessions.get("s").is_none());
        assert!(sessions.is_empty());
    }
}
