//! エンジン標準出力の行パーサ。
//!
//! I/O を持たない純粋な状態機械で、reader loop が 1 行ずつ [`OutputParser::feed`] に渡す。
//! 解釈できない行は [`ParseWarning`] として返し、状態は壊さない。

use crate::error::ParseWarning;
use crate::eval::{Evaluation, PvLine, Wdl};
use crate::option::{EngineOption, OptionRegistry};
use crate::util::is_keyword;

/// `info` 行で値を伴うキーワード。未知トークンを読み筋へ足すかどうかの判定にも使う。
const INFO_KEYWORDS: [&str; 16] = [
    "depth", "seldepth", "time", "nodes", "nps", "tbhits", "hashfull", "score", "wdl", "multipv",
    "pv", "string", "currmove", "currmovenumber", "lowerbound", "upperbound",
];

/// 1 行の解釈結果として上位へ通知するイベント。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    UciOk,
    ReadyOk,
    /// MultiPV 全本数が揃って確定したスナップショット
    Update(Evaluation),
    /// `bestmove` 受信。解析はこれで終了する。
    BestMove(Evaluation),
}

/// `id name` / `id author` で名乗られたエンジン情報。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineIdentity {
    pub name: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug)]
pub struct OutputParser {
    identity: EngineIdentity,
    options: OptionRegistry,
    multipv: u32,
    /// 組み立て中のスナップショット。解析中でなければ `None`。
    current: Option<Evaluation>,
    last_completed: Option<Evaluation>,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self {
            identity: EngineIdentity::default(),
            options: OptionRegistry::new(),
            multipv: 1,
            current: None,
            last_completed: None,
        }
    }

    pub fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    pub fn multipv(&self) -> u32 {
        self.multipv
    }

    /// スナップショット確定の基準となる MultiPV 本数。0 は 1 として扱う。
    pub fn set_multipv(&mut self, multipv: u32) {
        self.multipv = multipv.max(1);
    }

    pub fn is_analyzing(&self) -> bool {
        self.current.is_some()
    }

    /// 新しい解析を開始する。通し番号は 1 から振り直す。
    pub fn begin_analysis(&mut self, white_to_move: bool) {
        self.current = Some(Evaluation::new(white_to_move, 1));
        self.last_completed = None;
    }

    /// 解析を打ち切ったことにする（エンジン終了時など、`bestmove` が来ない場合）。
    pub fn abandon_analysis(&mut self) {
        self.current = None;
        self.last_completed = None;
    }

    pub fn feed(&mut self, line: &str) -> Result<Option<OutputEvent>, ParseWarning> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        self.dispatch(&tokens, line)
    }

    fn dispatch(&mut self, tokens: &[&str], line: &str) -> Result<Option<OutputEvent>, ParseWarning> {
        let Some((&head, rest)) = tokens.split_first() else {
            return Ok(None);
        };
        match head.to_ascii_lowercase().as_str() {
            "id" => {
                self.parse_id(rest);
                Ok(None)
            }
            "uciok" => Ok(Some(OutputEvent::UciOk)),
            "readyok" => Ok(Some(OutputEvent::ReadyOk)),
            "option" => {
                self.options.insert(EngineOption::parse(rest)?);
                Ok(None)
            }
            "info" => self.parse_info(rest, line),
            "bestmove" => Ok(self.finish(rest.first().copied())),
            "copyprotection" | "registration" => Ok(None),
            // 先頭に余計な語が付いた行は、その語を落として読み直す
            _ => self.dispatch(rest, line),
        }
    }

    fn parse_id(&mut self, rest: &[&str]) {
        let Some((&key, value)) = rest.split_first() else {
            return;
        };
        if value.is_empty() {
            return;
        }
        let value = value.join(" ");
        if is_keyword(key, "name") {
            self.identity.name = Some(value);
        } else if is_keyword(key, "author") {
            self.identity.author = Some(value);
        }
    }

    fn parse_info(&mut self, tokens: &[&str], line: &str) -> Result<Option<OutputEvent>, ParseWarning> {
        let mut info = PvLine { multipv: 1, ..PvLine::default() };
        let mut has_line = false;

        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            match token.to_ascii_lowercase().as_str() {
                "depth" => {
                    set_lenient(&mut info.depth, tokens, i + 1, line)?;
                    i += 2;
                }
                "seldepth" => {
                    set_lenient(&mut info.seldepth, tokens, i + 1, line)?;
                    i += 2;
                }
                "time" => {
                    set_lenient(&mut info.time_ms, tokens, i + 1, line)?;
                    i += 2;
                }
                "nodes" => {
                    set_lenient(&mut info.nodes, tokens, i + 1, line)?;
                    i += 2;
                }
                "nps" => {
                    set_lenient(&mut info.nps, tokens, i + 1, line)?;
                    i += 2;
                }
                "tbhits" => {
                    set_lenient(&mut info.tbhits, tokens, i + 1, line)?;
                    i += 2;
                }
                "hashfull" => {
                    set_lenient(&mut info.hashfull, tokens, i + 1, line)?;
                    i += 2;
                }
                "score" => {
                    let kind = token_at(tokens, i + 1, line)?;
                    if let Ok(value) = token_at(tokens, i + 2, line)?.parse::<i32>() {
                        if is_keyword(kind, "mate") {
                            info.score_mate = Some(value);
                            info.score_cp = None;
                        } else {
                            info.score_cp = Some(value);
                            info.score_mate = None;
                        }
                    }
                    i += 3;
                    // `score cp 76 lowerbound` の境界指定は読み飛ばす
                    if tokens
                        .get(i)
                        .is_some_and(|t| is_keyword(t, "lowerbound") || is_keyword(t, "upperbound"))
                    {
                        i += 1;
                    }
                }
                "wdl" => {
                    info.wdl = Some(Wdl {
                        win: number(tokens, i + 1, line)?,
                        draw: number(tokens, i + 2, line)?,
                        loss: number(tokens, i + 3, line)?,
                    });
                    i += 4;
                }
                "multipv" => {
                    let index: u32 = number(tokens, i + 1, line)?;
                    if index == 0 {
                        return Err(ParseWarning::new("multipv index must be positive", line));
                    }
                    info.multipv = index;
                    has_line = true;
                    i += 2;
                }
                "pv" => {
                    info.pv.extend(tokens[i + 1..].iter().map(|t| (*t).to_string()));
                    has_line = true;
                    break;
                }
                "string" => break,
                "currmove" | "currmovenumber" => i += 2,
                _ => {
                    if has_line && !is_info_keyword(token) {
                        info.pv.push(token.to_string());
                    }
                    i += 1;
                }
            }
        }

        if !has_line {
            return Ok(None);
        }
        let Some(current) = self.current.as_mut() else {
            return Ok(None);
        };
        let index = info.multipv;
        current.lines.insert(index, info);
        if index != self.multipv {
            return Ok(None);
        }

        let next = current.successor();
        let completed = std::mem::replace(current, next);
        self.last_completed = Some(completed.clone());
        Ok(Some(OutputEvent::Update(completed)))
    }

    fn finish(&mut self, best_move: Option<&str>) -> Option<OutputEvent> {
        let mut evaluation = self.current.take()?;
        evaluation.best_move = best_move.map(str::to_string);
        if evaluation.lines.is_empty() {
            if let Some(last) = self.last_completed.take() {
                evaluation.lines = last.lines;
            }
        }
        self.last_completed = None;
        Some(OutputEvent::BestMove(evaluation))
    }
}

fn is_info_keyword(token: &str) -> bool {
    INFO_KEYWORDS.iter().any(|k| is_keyword(token, k))
}

fn token_at<'a>(tokens: &[&'a str], index: usize, line: &str) -> Result<&'a str, ParseWarning> {
    tokens.get(index).copied().ok_or_else(|| ParseWarning::new("truncated info field", line))
}

fn number<T: std::str::FromStr>(tokens: &[&str], index: usize, line: &str) -> Result<T, ParseWarning> {
    token_at(tokens, index, line)?
        .parse()
        .map_err(|_| ParseWarning::new("expected a number", line))
}

/// 値が数値でなければ黙って無視する（キーワードの直後に値が無い場合のみ警告）。
fn set_lenient<T: std::str::FromStr>(
    slot: &mut T,
    tokens: &[&str],
    index: usize,
    line: &str,
) -> Result<(), ParseWarning> {
    if let Ok(value) = token_at(tokens, index, line)?.parse() {
        *slot = value;
    }
    Ok(())
}
