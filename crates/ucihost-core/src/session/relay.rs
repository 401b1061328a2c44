//! 解析イベントをクライアント向けメッセージへ変換する。

use log::warn;

use crate::engine::AnalysisEvent;
use crate::eval::{Evaluation, PvLine};
use crate::request::AnalysisRequest;

/// 通し番号が最後に受理したものより小さい更新を捨てる。
#[derive(Debug, Default, Clone, Copy)]
pub struct StalenessFilter {
    last_accepted: u64,
}

impl StalenessFilter {
    pub fn accept(&mut self, counter: u64) -> bool {
        if counter < self.last_accepted {
            return false;
        }
        self.last_accepted = counter;
        true
    }

    pub fn last_accepted(&self) -> u64 {
        self.last_accepted
    }
}

/// 返信の形式。解析要求がテキストか JSON かで決まる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Uci,
    Json,
}

impl RelayMode {
    /// `verbose_evaluation` が立っていれば評価を JSON のまま返す。
    pub fn for_request(request: &AnalysisRequest) -> Self {
        if request.verbose_evaluation { RelayMode::Json } else { RelayMode::Uci }
    }
}

/// スコアを持つ読み筋 1 本を `info` 行にする。スコアが無ければ `None`。
pub fn format_info_line(line: &PvLine) -> Option<String> {
    let score = match (line.score_cp, line.score_mate) {
        (Some(cp), _) => format!("cp {cp}"),
        (None, Some(mate)) => format!("mate {mate}"),
        (None, None) => return None,
    };
    Some(format!(
        "info depth {} seldepth {} multipv {} score {} nodes {} nps {} hashfull {} tbhits {} time {} pv {}",
        line.depth,
        line.seldepth,
        line.multipv,
        score,
        line.nodes,
        line.nps,
        line.hashfull,
        line.tbhits,
        line.time_ms,
        line.pv.join(" ")
    ))
}

pub fn format_info_lines(evaluation: &Evaluation) -> Vec<String> {
    evaluation.lines.values().filter_map(format_info_line).collect()
}

/// 1 回の解析ぶんの変換器。
#[derive(Debug)]
pub struct Relay {
    mode: RelayMode,
    filter: StalenessFilter,
}

impl Relay {
    pub fn new(mode: RelayMode) -> Self {
        Self { mode, filter: StalenessFilter::default() }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// イベント 1 件に対して送るメッセージ列。
    pub fn render(&mut self, event: AnalysisEvent) -> Vec<String> {
        match event {
            AnalysisEvent::Update(evaluation) => self.render_update(&evaluation),
            AnalysisEvent::BestMove(evaluation) => {
                let mut messages = match (self.mode, evaluation.best_move.is_some()) {
                    (RelayMode::Json, _) | (RelayMode::Uci, true) => self.render_update(&evaluation),
                    (RelayMode::Uci, false) => Vec::new(),
                };
                if let Some(best_move) = &evaluation.best_move {
                    messages.push(format!("bestmove {best_move}"));
                }
                messages
            }
        }
    }

    fn render_update(&mut self, evaluation: &Evaluation) -> Vec<String> {
        if !self.filter.accept(evaluation.counter) {
            return Vec::new();
        }
        match self.mode {
            RelayMode::Uci => format_info_lines(evaluation),
            RelayMode::Json => match evaluation.to_json() {
                Ok(json) => vec![json],
                Err(e) => {
                    warn!("failed to serialize evaluation: {}", e);
                    Vec::new()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(counter: u64) -> Evaluation {
        let mut eval = Evaluation::new(true, counter);
        eval.lines.insert(
            1,
            PvLine {
                multipv: 1,
                depth: counter as u32,
                score_cp: Some(25),
                pv: vec!["e2e4".into(), "e7e5".into()],
                ..PvLine::default()
            },
        );
        eval
    }

    #[test]
    fn filter_drops_out_of_order_counters() {
        let mut filter = StalenessFilter::default();
        let accepted: Vec<u64> = [1, 3, 2, 4].into_iter().filter(|&c| filter.accept(c)).collect();
        assert_eq!(accepted, vec![1, 3, 4]);
        assert_eq!(filter.last_accepted(), 4);
        assert!(filter.accept(4));
    }

    #[test]
    fn relay_applies_filter_to_updates() {
        let mut relay = Relay::new(RelayMode::Uci);
        let depths: Vec<String> = [1, 3, 2, 4]
            .into_iter()
            .flat_map(|c| relay.render(AnalysisEvent::Update(snapshot(c))))
            .collect();
        assert_eq!(depths.len(), 3);
        assert!(depths[1].starts_with("info depth 3 "));
        assert!(depths[2].starts_with("info depth 4 "));
    }

    #[test]
    fn info_line_has_fixed_field_order() {
        let line = PvLine {
            multipv: 2,
            depth: 20,
            seldepth: 29,
            score_mate: Some(-3),
            nodes: 3_501_156,
            nps: 1_309_822,
            hashfull: 899,
            tbhits: 0,
            time_ms: 2673,
            pv: vec!["e2e4".into(), "e7e6".into()],
            ..PvLine::default()
        };
        assert_eq!(
            format_info_line(&line).unwrap(),
            "info depth 20 seldepth 29 multipv 2 score mate -3 nodes 3501156 nps 1309822 \
             hashfull 899 tbhits 0 time 2673 pv e2e4 e7e6"
        );
        assert_eq!(format_info_line(&PvLine { multipv: 1, ..PvLine::default() }), None);
    }

    #[test]
    fn uci_bestmove_flushes_final_snapshot_first() {
        let mut relay = Relay::new(RelayMode::Uci);
        let mut last = snapshot(5);
        last.best_move = Some("e2e4".into());
        let messages = relay.render(AnalysisEvent::BestMove(last));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("info depth 5"));
        assert_eq!(messages[1], "bestmove e2e4");

        let mut relay = Relay::new(RelayMode::Uci);
        assert!(relay.render(AnalysisEvent::BestMove(snapshot(1))).is_empty());
    }

    #[test]
    fn json_messages_carry_best_move_only_at_the_end() {
        let mut relay = Relay::new(RelayMode::Json);
        let update = relay.render(AnalysisEvent::Update(snapshot(1)));
        let parsed: Evaluation = serde_json::from_str(&update[0]).unwrap();
        assert_eq!(parsed.best_move, None);

        let mut last = snapshot(2);
        last.best_move = Some("d2d4".into());
        let messages = relay.render(AnalysisEvent::BestMove(last));
        assert_eq!(messages.len(), 2);
        let parsed: Evaluation = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(parsed.best_move.as_deref(), Some("d2d4"));
        assert_eq!(messages[1], "bestmove d2d4");
    }

    #[test]
    fn verbose_evaluation_selects_json_relay() {
        let mut request = AnalysisRequest::for_session("s1");
        assert_eq!(RelayMode::for_request(&request), RelayMode::Uci);

        request.verbose_evaluation = true;
        assert_eq!(RelayMode::for_request(&request), RelayMode::Json);

        let parsed = AnalysisRequest::from_json(r#"{"InitialFen":"startpos","VerboseEvaluation":true}"#).unwrap();
        assert_eq!(RelayMode::for_request(&parsed), RelayMode::Json);
    }
}
