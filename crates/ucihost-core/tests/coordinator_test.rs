//! Integration tests for engine sharing and analysis preemption

mod common;

use std::sync::Arc;

use common::*;
use tokio::sync::mpsc;
use ucihost_core::engine::position::STARTPOS_FEN;
use ucihost_core::{
    AnalysisCoordinator, AnalysisError, AnalysisEvent, AnalysisRequest, EngineError, EngineRegistry,
    HostConfig, SearchLimits,
};

fn request(session: &str, moves: &[&str]) -> AnalysisRequest {
    AnalysisRequest {
        initial_fen: Some(STARTPOS_FEN.to_string()),
        moves: moves.iter().map(|m| m.to_string()).collect(),
        multipv: Some(1),
        ..AnalysisRequest::for_session(session)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn new_analysis_preempts_the_previous_owner() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = AnalysisCoordinator::new(ready_registry(dir.path()).await);

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    coordinator.start_analysis(&request("a", &[]), &[], SearchLimits::infinite(), tx_a).await.unwrap();
    assert_eq!(coordinator.current_owner().await.as_deref(), Some("a"));
    assert!(matches!(recv_event(&mut rx_a).await, AnalysisEvent::Update(_)));

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    coordinator
        .start_analysis(&request("b", &["e2e4"]), &[], SearchLimits::infinite(), tx_b)
        .await
        .unwrap();
    assert_eq!(coordinator.current_owner().await.as_deref(), Some("b"));

    // 前の解析の bestmove は前の持ち主へ届き、その後チャネルは閉じる
    let events = recv_until_bestmove(&mut rx_a).await;
    let Some(AnalysisEvent::BestMove(best_a)) = events.last() else {
        panic!("session a should receive its bestmove");
    };
    assert_eq!(best_a.best_move.as_deref(), Some("e2e4"));
    assert!(rx_a.recv().await.is_none());

    assert!(!coordinator.stop_for_session("a").await.unwrap());
    assert_eq!(coordinator.current_owner().await.as_deref(), Some("b"));
    assert!(coordinator.stop_for_session("b").await.unwrap());
    assert_eq!(coordinator.current_owner().await, None);

    let events = recv_until_bestmove(&mut rx_b).await;
    let Some(AnalysisEvent::BestMove(best_b)) = events.last() else {
        panic!("session b should receive its bestmove");
    };
    assert!(!best_b.white_to_move);
    assert_eq!(best_b.best_move.as_deref(), Some("e7e5"));

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_leave_exactly_one_owner() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(AnalysisCoordinator::new(ready_registry(dir.path()).await));

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let first = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator.start_analysis(&request("a", &[]), &[], SearchLimits::infinite(), tx_a).await
        })
    };
    let second = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator.start_analysis(&request("b", &[]), &[], SearchLimits::infinite(), tx_b).await
        })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let owner = coordinator.current_owner().await.expect("one session owns the engine");
    let preempted = if owner == "a" { &mut rx_b } else { &mut rx_a };
    let events = recv_until_bestmove(preempted).await;
    assert!(matches!(events.last(), Some(AnalysisEvent::BestMove(_))));

    coordinator.stop_analysis().await.unwrap();
    let winner = if owner == "a" { &mut rx_a } else { &mut rx_b };
    recv_until_bestmove(winner).await;

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bounded_request_applies_settings_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = AnalysisCoordinator::new(ready_registry(dir.path()).await);

    let request = AnalysisRequest {
        multipv: None,
        threads: Some(2),
        hash_size_mb: Some(32),
        max_depth: Some(2),
        uci_new_game: true,
        ..request("json", &["e2e4", "e7e5"])
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    coordinator.start_analysis(&request, &[], request.search_limits(), tx).await.unwrap();

    let events = recv_until_bestmove(&mut rx).await;
    let Some(AnalysisEvent::BestMove(best)) = events.last() else {
        panic!("expected bestmove");
    };
    // 既定の MultiPV (4) が送られている
    assert_eq!(best.lines.len(), 4);
    assert_eq!(best.primary().map(|l| l.depth), Some(2));
    assert!(best.white_to_move);

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_position_keeps_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = AnalysisCoordinator::new(ready_registry(dir.path()).await);

    let bad = AnalysisRequest { initial_fen: Some("8/8/8/8 x".into()), ..request("a", &[]) };
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = coordinator.start_analysis(&bad, &[], SearchLimits::infinite(), tx).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Engine(EngineError::InvalidPosition(_))), "unexpected: {err}");
    assert_eq!(coordinator.current_owner().await, None);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let limits = SearchLimits { depth: Some(1), ..SearchLimits::default() };
    coordinator.start_analysis(&request("a", &[]), &[], limits, tx).await.unwrap();
    recv_until_bestmove(&mut rx).await;

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn start_fails_without_position_or_engine() {
    let coordinator = AnalysisCoordinator::new(Arc::new(EngineRegistry::from_config(&HostConfig::default())));
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = coordinator
        .start_analysis(&request("a", &[]), &[], SearchLimits::infinite(), tx.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::NoEngineSelected));

    let no_position = AnalysisRequest { initial_fen: Some("   ".into()), ..request("a", &[]) };
    let err = coordinator.start_analysis(&no_position, &[], SearchLimits::infinite(), tx).await.unwrap_err();
    assert!(matches!(err, AnalysisError::MissingPosition));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_engine_is_a_no_op() {
    let coordinator = AnalysisCoordinator::new(Arc::new(EngineRegistry::from_config(&HostConfig::default())));
    coordinator.stop_analysis().await.unwrap();
    assert!(!coordinator.stop_for_session("nobody").await.unwrap());
    coordinator.shutdown().await;
}
