//! UCI エンジン子プロセスのアダプタ。
//!
//! 1 プロセスにつき reader task を 1 本持ち、標準出力を行単位で [`OutputParser`] に流す。
//! パーサ状態と評価値の送り先は 1 つの Mutex で直列化される。
//! ライフサイクルは `watch` チャネル上の [`EngineState`] で表す:
//!
//! ```text
//! NotStarted → HandshakeWaitingOk → HandshakeWaitingReady → Idle ⇄ Analyzing → Stopping → Idle
//!                                                              (任意の状態) → Exited / Disposed
//! ```

pub mod output;
pub mod position;

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch};

use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::eval::Evaluation;
use crate::option::OptionRegistry;
use crate::request::SearchLimits;
use crate::util::{is_keyword, lock_or_recover};

pub use output::{EngineIdentity, OutputEvent, OutputParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    NotStarted,
    HandshakeWaitingOk,
    HandshakeWaitingReady,
    Idle,
    Analyzing,
    /// `stop` 送信済みで `bestmove` 待ち
    Stopping,
    Exited,
    Disposed,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Exited | EngineState::Disposed)
    }

    pub fn is_searching(self) -> bool {
        matches!(self, EngineState::Analyzing | EngineState::Stopping)
    }
}

/// reader task から解析の受け手へ流れるイベント。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisEvent {
    Update(Evaluation),
    BestMove(Evaluation),
}

pub type AnalysisSink = mpsc::UnboundedSender<AnalysisEvent>;

struct OutputState {
    parser: OutputParser,
    sink: Option<AnalysisSink>,
}

impl OutputState {
    fn deliver(&mut self, event: AnalysisEvent) {
        if let Some(sink) = &self.sink {
            if sink.send(event).is_err() {
                // 受け手が居なくなった解析の出力は捨てる
                self.sink = None;
            }
        }
    }
}

/// reader task と制御側で共有する状態。
struct Shared {
    label: String,
    output: Mutex<OutputState>,
    state: watch::Sender<EngineState>,
}

impl Shared {
    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    /// 現在の状態が `from` のときだけ `to` へ遷移する。
    fn advance(&self, from: EngineState, to: EngineState) {
        self.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        });
    }

    fn handle_line(&self, line: &str) {
        debug!("[engine:{}] << {}", self.label, line);
        let mut output = lock_or_recover(&self.output);
        let event = match output.parser.feed(line) {
            Ok(event) => event,
            Err(warning) => {
                debug!("[engine:{}] ignoring line: {}", self.label, warning);
                return;
            }
        };
        match event {
            Some(OutputEvent::UciOk) => {
                self.advance(EngineState::HandshakeWaitingOk, EngineState::HandshakeWaitingReady);
            }
            Some(OutputEvent::ReadyOk) => {
                self.advance(EngineState::HandshakeWaitingReady, EngineState::Idle);
            }
            Some(OutputEvent::Update(evaluation)) => {
                output.deliver(AnalysisEvent::Update(evaluation));
            }
            Some(OutputEvent::BestMove(evaluation)) => {
                output.deliver(AnalysisEvent::BestMove(evaluation));
                self.state.send_if_modified(|s| {
                    if s.is_searching() {
                        *s = EngineState::Idle;
                        true
                    } else {
                        false
                    }
                });
            }
            None => {}
        }
    }

    fn handle_exit(&self) {
        {
            let mut output = lock_or_recover(&self.output);
            output.parser.abandon_analysis();
            output.sink = None;
        }
        self.state.send_if_modified(|s| {
            if *s == EngineState::Disposed {
                false
            } else {
                *s = EngineState::Exited;
                true
            }
        });
        debug!("[engine:{}] process output closed", self.label);
    }
}

async fn read_stdout(shared: Arc<Shared>, stdout: ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => shared.handle_line(&line),
            Ok(None) => break,
            Err(e) => {
                debug!("[engine:{}] stdout read error: {}", shared.label, e);
                break;
            }
        }
    }
    shared.handle_exit();
}

async fn read_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[engine:{}] stderr: {}", label, line);
    }
}

/// UCI エンジン 1 プロセスに対する入出力をカプセル化する。
pub struct UciEngine {
    shared: Arc<Shared>,
    state: watch::Receiver<EngineState>,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    settings: EngineSettings,
    white_to_move: bool,
}

impl UciEngine {
    /// プロセスを起動し、`uci` → `uciok` → `isready` → `readyok` の handshake を済ませる。
    ///
    /// それぞれの待ち合わせは `settings.handshake_timeout()` で打ち切る。
    pub async fn start(
        path: &Path,
        label: impl Into<String>,
        settings: &EngineSettings,
    ) -> Result<Self, EngineError> {
        let label = label.into();
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Startup(format!("failed to spawn engine at {}: {e}", path.display()))
            })?;
        let stdin = child.stdin.take().ok_or_else(|| EngineError::Startup("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| EngineError::Startup("no stdout".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| EngineError::Startup("no stderr".into()))?;

        let (state_tx, state_rx) = watch::channel(EngineState::NotStarted);
        let shared = Arc::new(Shared {
            label: label.clone(),
            output: Mutex::new(OutputState { parser: OutputParser::new(), sink: None }),
            state: state_tx,
        });
        tokio::spawn(read_stdout(Arc::clone(&shared), stdout));
        tokio::spawn(read_stderr(label, stderr));

        let mut engine = Self {
            shared,
            state: state_rx,
            child,
            stdin: BufWriter::new(stdin),
            settings: settings.clone(),
            white_to_move: true,
        };
        if let Err(e) = engine.handshake().await {
            let e = match e {
                EngineError::Startup(_) | EngineError::StartupTimeout { .. } => e,
                other => EngineError::Startup(other.to_string()),
            };
            warn!("[engine:{}] handshake failed: {}", engine.label(), e);
            engine.kill().await;
            return Err(e);
        }
        Ok(engine)
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        let timeout = self.settings.handshake_timeout();

        self.shared.advance(EngineState::NotStarted, EngineState::HandshakeWaitingOk);
        self.write_line("uci").await?;
        self.wait_handshake(EngineState::HandshakeWaitingOk, "uciok", timeout).await?;

        self.write_line("isready").await?;
        self.wait_handshake(EngineState::HandshakeWaitingReady, "readyok", timeout).await
    }

    async fn wait_handshake(
        &self,
        waiting: EngineState,
        waiting_for: &'static str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        match self.wait_until(|s| s != waiting, timeout).await {
            Some(state) if state.is_terminal() => Err(EngineError::Startup(format!(
                "engine exited while waiting for {waiting_for}"
            ))),
            Some(_) => Ok(()),
            None => Err(EngineError::StartupTimeout { waiting_for, timeout }),
        }
    }

    async fn wait_for_state<F>(&self, predicate: F) -> EngineState
    where
        F: Fn(EngineState) -> bool,
    {
        let mut rx = self.state.clone();
        match rx.wait_for(|s| predicate(*s)).await {
            Ok(state) => *state,
            // sender は Shared が保持しているので閉じるのは終了時のみ
            Err(_) => EngineState::Exited,
        }
    }

    /// 条件を満たす状態になるまで待つ。時間切れなら `None`。
    async fn wait_until<F>(&self, predicate: F, timeout: Duration) -> Option<EngineState>
    where
        F: Fn(EngineState) -> bool,
    {
        tokio::time::timeout(timeout, self.wait_for_state(predicate)).await.ok()
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn is_analyzing(&self) -> bool {
        self.state().is_searching()
    }

    pub fn white_to_move(&self) -> bool {
        self.white_to_move
    }

    pub fn identity(&self) -> EngineIdentity {
        lock_or_recover(&self.shared.output).parser.identity().clone()
    }

    pub fn options(&self) -> OptionRegistry {
        lock_or_recover(&self.shared.output).parser.options().clone()
    }

    pub fn multipv(&self) -> u32 {
        lock_or_recover(&self.shared.output).parser.multipv()
    }

    /// プロセスがまだ生きているか。
    pub fn is_alive(&mut self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    pub async fn write_line(&mut self, msg: &str) -> Result<(), EngineError> {
        if self.state().is_terminal() {
            return Err(EngineError::Exited);
        }
        debug!("[engine:{}] >> {}", self.label(), msg);
        self.stdin.write_all(msg.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// `setoption name <name> value <value>` を送る。
    ///
    /// `MultiPV` はスナップショット確定の基準になるので値を控えておく。
    pub async fn set_option(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        if is_keyword(name, "MultiPV") {
            match value.trim().parse::<u32>() {
                Ok(multipv) => lock_or_recover(&self.shared.output).parser.set_multipv(multipv),
                Err(_) => debug!("[engine:{}] non-numeric MultiPV value `{}`", self.label(), value),
            }
        }
        self.write_line(&format!("setoption name {name} value {value}")).await
    }

    pub async fn new_game(&mut self) -> Result<(), EngineError> {
        self.white_to_move = true;
        self.write_line("ucinewgame").await
    }

    pub async fn set_position(&mut self, fen: &str) -> Result<(), EngineError> {
        self.set_fen_and_moves(fen, &[]).await
    }

    pub async fn set_fen_and_moves(&mut self, fen: &str, moves: &[String]) -> Result<(), EngineError> {
        self.white_to_move = position::side_to_move_after(fen, moves)?;
        self.write_line(&position::position_command(fen, moves)).await
    }

    /// 以降の評価値イベントの送り先を差し替える。以前の送り先は閉じられる。
    pub fn set_sink(&self, sink: Option<AnalysisSink>) {
        lock_or_recover(&self.shared.output).sink = sink;
    }

    /// 探索を開始する。評価値は [`set_sink`](Self::set_sink) で登録した送り先へ流れる。
    pub async fn go(&mut self, limits: &SearchLimits) -> Result<(), EngineError> {
        if self.state().is_terminal() {
            return Err(EngineError::Exited);
        }
        lock_or_recover(&self.shared.output).parser.begin_analysis(self.white_to_move);
        self.shared.set_state(EngineState::Analyzing);
        if let Err(e) = self.write_line(&limits.to_go_command()).await {
            lock_or_recover(&self.shared.output).parser.abandon_analysis();
            self.shared.advance(EngineState::Analyzing, EngineState::Idle);
            return Err(e);
        }
        Ok(())
    }

    /// ノード数指定なら `go nodes <n>` を送って `bestmove` まで待つ。
    /// 指定が無ければ `go infinite` を送ってすぐ戻る。
    pub async fn analyze(&mut self, node_limit: Option<u64>) -> Result<(), EngineError> {
        match node_limit.filter(|&n| n > 0) {
            Some(nodes) => {
                self.go(&SearchLimits { nodes: Some(nodes), ..SearchLimits::default() }).await?;
                if self.wait_for_state(|s| !s.is_searching()).await.is_terminal() {
                    return Err(EngineError::Exited);
                }
                Ok(())
            }
            None => self.go(&SearchLimits::infinite()).await,
        }
    }

    /// 探索中なら `stop` を送る。探索していなければ何もしない。
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        if self.state() != EngineState::Analyzing {
            return Ok(());
        }
        self.shared.advance(EngineState::Analyzing, EngineState::Stopping);
        self.write_line("stop").await
    }

    /// 探索が終わる（`bestmove` を受け取る）まで待つ。時間内に終われば `true`。
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.wait_until(|s| !s.is_searching(), timeout).await.is_some()
    }

    /// `stop` → `quit` を送り、一定時間待っても終わらなければ kill する。失敗は全て握りつぶす。
    pub async fn dispose(mut self) {
        if self.is_analyzing() {
            let _ = self.write_line("stop").await;
        }
        let _ = self.write_line("quit").await;
        match tokio::time::timeout(self.settings.quit_timeout(), self.child.wait()).await {
            Ok(Ok(status)) => debug!("[engine:{}] exited with {}", self.label(), status),
            Ok(Err(e)) => {
                debug!("[engine:{}] wait failed: {}", self.label(), e);
                self.kill().await;
            }
            Err(_) => {
                debug!("[engine:{}] did not quit in time, killing", self.label());
                self.kill().await;
            }
        }
        self.set_sink(None);
        self.shared.set_state(EngineState::Disposed);
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("[engine:{}] kill failed: {}", self.label(), e);
        }
    }
}
