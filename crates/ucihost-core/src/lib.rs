//! UCI エンジン 1 プロセスを複数のクライアントセッションで共有するためのコア。
//!
//! - [`engine`]: エンジン子プロセスのアダプタ（handshake、出力解析、MultiPV 集約）
//! - [`coordinator`]: 稼働中のエンジンと解析を高々 1 つに保つ
//! - [`session`]: セッション単位のコマンド解釈と評価値の配信
//! - [`dispatcher`]: セッションから呼ばれる入口
//!
//! ソケットは扱わない。接続の受け付けはサーバ側の責務。

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod eval;
pub mod option;
pub mod registry;
pub mod request;
pub mod session;
pub mod util;

pub use config::{EngineEntry, EngineSettings, HostConfig};
pub use coordinator::AnalysisCoordinator;
pub use dispatcher::ProtocolDispatcher;
pub use engine::{AnalysisEvent, AnalysisSink, EngineState, UciEngine};
pub use error::{AnalysisError, EngineError, ParseWarning};
pub use eval::{Evaluation, PvLine, Wdl};
pub use option::{EngineOption, OptionKind, OptionRegistry};
pub use registry::{EngineDefinition, EngineRegistry};
pub use request::{AnalysisRequest, SearchLimits};
pub use session::{Session, SessionRegistry};
