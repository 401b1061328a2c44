//! Common test utilities for ucihost-core integration tests

#![allow(dead_code)] // These utilities may be used by various test files

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use ucihost_core::{AnalysisEvent, EngineEntry, EngineRegistry, EngineSettings, HostConfig};

// Timeout constants for CI stability
pub const T_EVENT: Duration = Duration::from_secs(5); // Single event receive timeout
pub const T_HANG: Duration = Duration::from_millis(300); // Handshake timeout for hanging engines

pub fn mock_engine_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mock-uci-engine"))
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        multipv: 4,
        handshake_timeout_ms: 5_000,
        stop_timeout_ms: 2_000,
        quit_timeout_ms: 500,
    }
}

/// `dir` を engines_dir とし、疑似エンジンを既定エンジンとして登録した設定。
pub fn host_config(dir: &Path) -> HostConfig {
    HostConfig {
        engines_dir: dir.to_path_buf(),
        engines: vec![EngineEntry {
            name: "mock".into(),
            path: mock_engine_path().to_string_lossy().into_owned(),
            default: true,
        }],
        engine: test_settings(),
        ..HostConfig::default()
    }
}

pub async fn ready_registry(dir: &Path) -> Arc<EngineRegistry> {
    let registry = Arc::new(EngineRegistry::from_config(&host_config(dir)));
    registry.setup_engines().await;
    assert!(registry.current().is_some(), "mock engine failed its probe");
    registry
}

pub async fn recv_event(rx: &mut UnboundedReceiver<AnalysisEvent>) -> AnalysisEvent {
    tokio::time::timeout(T_EVENT, rx.recv())
        .await
        .expect("timed out waiting for analysis event")
        .expect("analysis channel closed")
}

/// `BestMove` までのイベントを全て集める。
pub async fn recv_until_bestmove(rx: &mut UnboundedReceiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
    let mut events = Vec::new();
    loop {
        let event = recv_event(rx).await;
        let done = matches!(event, AnalysisEvent::BestMove(_));
        events.push(event);
        if done {
            return events;
        }
    }
}

pub async fn recv_text(rx: &mut UnboundedReceiver<String>) -> String {
    tokio::time::timeout(T_EVENT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("transport closed")
}

/// 条件を満たす行が来るまでの全メッセージ（その行を含む）。
pub async fn recv_until(
    rx: &mut UnboundedReceiver<String>,
    predicate: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut messages = Vec::new();
    loop {
        let message = recv_text(rx).await;
        let done = predicate(&message);
        messages.push(message);
        if done {
            return messages;
        }
    }
}

/// 実行可能なシェルスクリプトを書き出す。
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    path
}
