//! クライアントから届く 1 メッセージの解釈。
//!
//! 先頭が `{` なら JSON の解析要求、それ以外は UCI 形式のテキストコマンドとして扱う。
//! キーワードは大文字小文字を区別しない。

use crate::engine::position::STARTPOS_FEN;
use crate::error::ParseWarning;
use crate::request::{AnalysisRequest, SearchLimits};
use crate::util::is_keyword;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Uci,
    IsReady,
    SetOption { name: String, value: String },
    UciNewGame,
    Position { fen: String, moves: Vec<String> },
    Go(SearchLimits),
    Stop,
    /// JSON で届いた 1 回完結の解析要求
    Request(AnalysisRequest),
}

impl ClientCommand {
    pub fn parse(message: &str) -> Result<Self, ParseWarning> {
        let trimmed = message.trim();
        if trimmed.starts_with('{') {
            return AnalysisRequest::from_json(trimmed).map(ClientCommand::Request);
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let Some((&head, rest)) = parts.split_first() else {
            return Err(ParseWarning::new("empty command", message));
        };
        match head.to_ascii_lowercase().as_str() {
            "uci" => Ok(ClientCommand::Uci),
            "isready" => Ok(ClientCommand::IsReady),
            "ucinewgame" => Ok(ClientCommand::UciNewGame),
            "stop" => Ok(ClientCommand::Stop),
            "setoption" => parse_setoption(rest, message),
            "position" => parse_position(rest, message),
            "go" => parse_go(rest, message).map(ClientCommand::Go),
            _ => Err(ParseWarning::new("unsupported command", message)),
        }
    }
}

/// `setoption name <name...> value <value...>`
fn parse_setoption(parts: &[&str], message: &str) -> Result<ClientCommand, ParseWarning> {
    if parts.len() < 4 || !is_keyword(parts[0], "name") {
        return Err(ParseWarning::new("expected `setoption name <name> value <value>`", message));
    }
    let value_pos = parts
        .iter()
        .skip(2)
        .position(|p| is_keyword(p, "value"))
        .map(|pos| pos + 2)
        .ok_or_else(|| ParseWarning::new("setoption without value", message))?;
    let name = parts[1..value_pos].join(" ");
    let value = parts[value_pos + 1..].join(" ");
    if value.is_empty() {
        return Err(ParseWarning::new("setoption without value", message));
    }
    Ok(ClientCommand::SetOption { name, value })
}

/// `position startpos [moves ...]` / `position fen <fen> [moves ...]`
///
/// FEN は最初に現れた `moves` トークンの手前までとする。
fn parse_position(parts: &[&str], message: &str) -> Result<ClientCommand, ParseWarning> {
    let Some((&kind, rest)) = parts.split_first() else {
        return Err(ParseWarning::new("position without startpos or fen", message));
    };
    let moves_pos = rest.iter().position(|p| is_keyword(p, "moves"));
    let moves: Vec<String> = match moves_pos {
        Some(pos) => rest[pos + 1..].iter().map(|m| (*m).to_string()).collect(),
        None => Vec::new(),
    };

    let fen = if is_keyword(kind, "startpos") {
        STARTPOS_FEN.to_string()
    } else if is_keyword(kind, "fen") {
        let fen = rest[..moves_pos.unwrap_or(rest.len())].join(" ");
        if fen.is_empty() {
            return Err(ParseWarning::new("position fen without a FEN", message));
        }
        fen
    } else {
        return Err(ParseWarning::new("position must be followed by startpos or fen", message));
    };
    Ok(ClientCommand::Position { fen, moves })
}

/// `go` の引数のうち `depth` / `nodes` / `movetime` / `infinite` を拾う。持ち時間系は無視する。
fn parse_go(parts: &[&str], message: &str) -> Result<SearchLimits, ParseWarning> {
    let mut limits = SearchLimits::default();
    let mut i = 0;
    while i < parts.len() {
        let token = parts[i].to_ascii_lowercase();
        match token.as_str() {
            "infinite" => limits.infinite = true,
            "depth" | "nodes" | "movetime" => {
                i += 1;
                let raw = parts
                    .get(i)
                    .ok_or_else(|| ParseWarning::new(format!("go {token} requires a value"), message))?;
                let invalid = || ParseWarning::new(format!("invalid {token} value `{raw}`"), message);
                match token.as_str() {
                    "depth" => limits.depth = Some(raw.parse().map_err(|_| invalid())?),
                    "nodes" => limits.nodes = Some(raw.parse().map_err(|_| invalid())?),
                    _ => limits.movetime_ms = Some(raw.parse().map_err(|_| invalid())?),
                }
            }
            _ => {}
        }
        i += 1;
    }
    Ok(limits)
}
