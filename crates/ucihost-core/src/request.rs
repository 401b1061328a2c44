//! 解析要求と探索条件。

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ParseWarning;

/// `go` コマンドの探索条件。何も指定されていなければ `go infinite` になる。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchLimits {
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub movetime_ms: Option<u64>,
    pub infinite: bool,
}

impl SearchLimits {
    pub fn infinite() -> Self {
        Self { infinite: true, ..Self::default() }
    }

    /// 深さ・ノード数・時間のいずれかで打ち切られる探索か。
    pub fn is_bounded(&self) -> bool {
        !self.infinite
            && (self.depth.is_some() || self.nodes.is_some() || self.movetime_ms.is_some())
    }

    pub fn to_go_command(&self) -> String {
        if !self.is_bounded() {
            return "go infinite".to_string();
        }
        let mut cmd = String::from("go");
        if let Some(depth) = self.depth {
            cmd.push_str(&format!(" depth {depth}"));
        }
        if let Some(nodes) = self.nodes {
            cmd.push_str(&format!(" nodes {nodes}"));
        }
        if let Some(movetime) = self.movetime_ms {
            cmd.push_str(&format!(" movetime {movetime}"));
        }
        cmd
    }
}

/// `null` を型のデフォルト値として受け付ける。
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 1 回の解析に必要な入力。
///
/// UCI テキストでは `position` / `ucinewgame` で少しずつ組み立てられ、`go` で確定する。
/// JSON では 1 メッセージで完結する。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    #[serde(default, alias = "Session")]
    pub session: Option<String>,
    #[serde(default, alias = "InitialFen")]
    pub initial_fen: Option<String>,
    #[serde(default, alias = "Moves", deserialize_with = "nullable")]
    pub moves: Vec<String>,
    #[serde(default, alias = "UciNewGame", deserialize_with = "nullable")]
    pub uci_new_game: bool,
    #[serde(default, alias = "MultiPv", alias = "multiPv")]
    pub multipv: Option<u32>,
    #[serde(default, alias = "Threads")]
    pub threads: Option<u32>,
    #[serde(default, alias = "HashSize", alias = "hashSize")]
    pub hash_size_mb: Option<u32>,
    #[serde(default, alias = "MaxDepth")]
    pub max_depth: Option<u32>,
    #[serde(default, alias = "Nodes")]
    pub nodes: Option<u64>,
    #[serde(default, alias = "Movetime", alias = "moveTime")]
    pub movetime: Option<u64>,
    #[serde(default, alias = "VerboseEvaluation", deserialize_with = "nullable")]
    pub verbose_evaluation: bool,
}

impl AnalysisRequest {
    pub fn for_session(session: &str) -> Self {
        Self { session: Some(session.to_string()), ..Self::default() }
    }

    pub fn from_json(text: &str) -> Result<Self, ParseWarning> {
        serde_json::from_str(text).map_err(|e| ParseWarning::new(e.to_string(), text))
    }

    /// 空白だけの FEN は未指定とみなす。
    pub fn fen(&self) -> Option<&str> {
        self.initial_fen.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }

    pub fn search_limits(&self) -> SearchLimits {
        SearchLimits {
            depth: self.max_depth,
            nodes: self.nodes,
            movetime_ms: self.movetime,
            infinite: false,
        }
    }

    /// リクエスト自体が指定するエンジン設定（`Threads` / `Hash`）。
    pub fn engine_options(&self) -> Vec<(String, String)> {
        let mut options = Vec::new();
        if let Some(threads) = self.threads {
            options.push(("Threads".to_string(), threads.to_string()));
        }
        if let Some(hash) = self.hash_size_mb {
            options.push(("Hash".to_string(), hash.to_string()));
        }
        options
    }
}
