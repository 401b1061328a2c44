//! 設定ファイルの型定義。読み込み（TOML / JSON の判別）はサーバ側で行う。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen() -> String {
    "127.0.0.1:6464".to_string()
}

fn default_engines_dir() -> PathBuf {
    PathBuf::from("engines")
}

fn default_multipv() -> u32 {
    4
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_stop_timeout_ms() -> u64 {
    2_000
}

fn default_quit_timeout_ms() -> u64 {
    1_000
}

/// ホスト全体の設定。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// エンジンの `path` はこのディレクトリからの相対パスとして解決する
    #[serde(default = "default_engines_dir")]
    pub engines_dir: PathBuf,
    /// 設定されていれば、接続時の `secret` クエリと一致しなければならない
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub engines: Vec<EngineEntry>,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            engines_dir: default_engines_dir(),
            secret: None,
            engines: Vec::new(),
            engine: EngineSettings::default(),
        }
    }
}

impl HostConfig {
    /// 名前とパスが揃っているエンジン定義だけを返す。
    pub fn usable_engines(&self) -> impl Iterator<Item = &EngineEntry> {
        self.engines.iter().filter(|e| !e.name.trim().is_empty() && !e.path.trim().is_empty())
    }
}

/// 設定ファイル上のエンジン定義 1 件。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub default: bool,
}

/// エンジンプロセスの扱いに関する設定。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// 解析開始時に送る MultiPV（リクエスト側の指定が優先）
    #[serde(default = "default_multipv")]
    pub multipv: u32,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// 探索中のエンジンを止めて `bestmove` を待つ上限
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_quit_timeout_ms")]
    pub quit_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            multipv: default_multipv(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            quit_timeout_ms: default_quit_timeout_ms(),
        }
    }
}

impl EngineSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_timeout_ms)
    }
}
