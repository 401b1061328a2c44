//! 評価値データモデル。
//!
//! [`PvLine`] は読み筋 1 本、[`Evaluation`] は MultiPV 本数ぶんの読み筋をまとめた
//! スナップショット。どちらも振る舞いを持たない純粋なデータで、
//! エンジンから受け取った値をそのまま保持する（スコアは手番側視点）。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `info ... wdl W D L` の勝率情報（千分率）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wdl {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
}

/// 読み筋 1 本ぶんの探索情報。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PvLine {
    /// 1 始まりの MultiPV 番号
    pub multipv: u32,
    pub depth: u32,
    pub seldepth: u32,
    pub score_cp: Option<i32>,
    pub score_mate: Option<i32>,
    pub nodes: u64,
    pub nps: u64,
    pub tbhits: u64,
    /// 置換表使用率（千分率）
    pub hashfull: u32,
    pub time_ms: u64,
    pub pv: Vec<String>,
    pub wdl: Option<Wdl>,
}

impl PvLine {
    pub fn has_score(&self) -> bool {
        self.score_cp.is_some() || self.score_mate.is_some()
    }

    /// 人間向けのスコア表記。
    ///
    /// エンジンは手番側視点でスコアを返すので、黒番なら符号を反転して白視点に揃える。
    /// 詰みは `#N`、それ以外は centipawn を 100 で割った小数 2 桁。スコアが無ければ空文字列。
    pub fn score_string(&self, white_to_move: bool) -> String {
        let factor: i64 = if white_to_move { 1 } else { -1 };
        if let Some(mate) = self.score_mate {
            return format!("#{}", i64::from(mate) * factor);
        }
        match self.score_cp {
            Some(cp) => {
                let value = i64::from(cp) * factor;
                let sign = if value < 0 { "-" } else { "" };
                let abs = value.unsigned_abs();
                format!("{sign}{}.{:02}", abs / 100, abs % 100)
            }
            None => String::new(),
        }
    }
}

/// MultiPV 全本数を集約した評価スナップショット。
///
/// reader loop が 1 つずつ組み立て、最大 MultiPV 番号の行が揃った時点で
/// 受け手に引き渡される。引き渡し後は不変。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Evaluation {
    pub white_to_move: bool,
    /// UCI 形式の最善手（例: `e2e4`）。`bestmove` 受信までは `None`。
    pub best_move: Option<String>,
    /// 解析ごとに 1 から始まる単調増加の通し番号
    pub counter: u64,
    pub lines: BTreeMap<u32, PvLine>,
}

impl Evaluation {
    pub fn new(white_to_move: bool, counter: u64) -> Self {
        Self { white_to_move, best_move: None, counter, lines: BTreeMap::new() }
    }

    /// 次のスナップショット（通し番号 +1、同じ手番）。
    pub fn successor(&self) -> Self {
        Self::new(self.white_to_move, self.counter + 1)
    }

    pub fn primary(&self) -> Option<&PvLine> {
        self.lines.get(&1)
    }

    pub fn score_string(&self) -> String {
        self.primary().map(|line| line.score_string(self.white_to_move)).unwrap_or_default()
    }

    pub fn cp(&self) -> Option<i32> {
        self.primary().and_then(|line| line.score_cp)
    }

    pub fn mate(&self) -> Option<i32> {
        self.primary().and_then(|line| line.score_mate)
    }

    /// JSON モードで送る 1 メッセージ分の文字列。
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&EvaluationPayload {
            evaluation: self,
            eval_string: self.score_string(),
            cp: self.cp(),
            mate: self.mate(),
        })
    }
}

/// JSON 送信用: スナップショット本体に主読み筋の派生値を添える。
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationPayload<'a> {
    #[serde(flatten)]
    evaluation: &'a Evaluation,
    eval_string: String,
    cp: Option<i32>,
    mate: Option<i32>,
}
