//! 結合テスト用の UCI エンジンもどき。
//!
//! 盤面は理解せず、決め打ちの `info` / `bestmove` を返す。
//! - `go infinite`: 読み筋を 2 巡出して `stop` を待ち、`stop` で最終の読み筋と `bestmove` を返す
//! - `go depth N` 等: 深さ 1..=N（最大 5）の読み筋を出してすぐ `bestmove`
//! - 環境変数 `MOCK_UCI_HANG` があれば `uciok` を返さない

use std::io::{self, BufRead, Write};

static WHITE_MOVES: [&str; 4] = ["e2e4", "d2d4", "g1f3", "c2c4"];
static BLACK_MOVES: [&str; 4] = ["e7e5", "c7c5", "g8f6", "e7e6"];

struct MockEngine {
    multipv: u32,
    white_to_move: bool,
    searching: bool,
    depth: u32,
}

impl MockEngine {
    fn candidates(&self) -> &'static [&'static str; 4] {
        if self.white_to_move { &WHITE_MOVES } else { &BLACK_MOVES }
    }

    fn emit_round(&self, out: &mut impl Write, depth: u32) -> io::Result<()> {
        for index in 1..=self.multipv.min(4) {
            let first = self.candidates()[(index - 1) as usize];
            let cp = 30 - 10 * index as i32 + depth as i32;
            writeln!(
                out,
                "info depth {depth} seldepth {} multipv {index} score cp {cp} nodes {} nps 100000 \
                 hashfull 0 tbhits 0 time {} pv {first} a7a6",
                depth + 2,
                depth * 1000,
                depth * 10
            )?;
        }
        Ok(())
    }

    fn emit_bestmove(&mut self, out: &mut impl Write) -> io::Result<()> {
        self.searching = false;
        writeln!(out, "bestmove {} ponder a7a6", self.candidates()[0])
    }

    fn set_position(&mut self, tokens: &[&str]) {
        let moves_pos = tokens.iter().position(|t| *t == "moves");
        let move_count = moves_pos.map_or(0, |pos| tokens.len() - pos - 1);
        let white = match tokens.get(1) {
            Some(&"fen") => tokens.get(3).is_none_or(|side| *side != "b"),
            _ => true,
        };
        self.white_to_move = white ^ (move_count % 2 == 1);
    }

    fn go(&mut self, tokens: &[&str], out: &mut impl Write) -> io::Result<()> {
        let value = |key: &str| {
            tokens.iter().position(|t| *t == key).and_then(|i| tokens.get(i + 1)).and_then(|v| v.parse::<u32>().ok())
        };
        self.searching = true;
        if tokens.contains(&"infinite") || tokens.len() == 1 {
            self.depth = 2;
            self.emit_round(out, 1)?;
            self.emit_round(out, 2)?;
            return Ok(());
        }
        let depth = value("depth").unwrap_or(3).clamp(1, 5);
        for d in 1..=depth {
            self.emit_round(out, d)?;
        }
        self.emit_bestmove(out)
    }
}

fn main() -> io::Result<()> {
    let hang = std::env::var_os("MOCK_UCI_HANG").is_some();
    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    let mut engine = MockEngine { multipv: 1, white_to_move: true, searching: false, depth: 0 };
    eprintln!("mock engine started");

    for line in stdin.lock().lines() {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first().copied() {
            Some("uci") => {
                writeln!(out, "id name Mock Engine 1.0")?;
                writeln!(out, "id author ucihost tests")?;
                writeln!(out, "option name Threads type spin default 1 min 1 max 512")?;
                writeln!(out, "option name Hash type spin default 16 min 1 max 33554432")?;
                writeln!(out, "option name MultiPV type spin default 1 min 1 max 500")?;
                writeln!(out, "option name Clear Hash type button")?;
                writeln!(out, "option name Style type combo default Normal var Solid var Normal var Risky")?;
                if !hang {
                    writeln!(out, "uciok")?;
                }
            }
            Some("isready") => writeln!(out, "readyok")?,
            Some("setoption") => {
                if let Some(pos) = tokens.iter().position(|t| *t == "value").filter(|&pos| pos >= 2) {
                    let name = tokens[2..pos].join(" ");
                    if name.eq_ignore_ascii_case("MultiPV") {
                        engine.multipv = tokens.get(pos + 1).and_then(|v| v.parse().ok()).unwrap_or(1);
                    }
                }
            }
            Some("ucinewgame") => engine.white_to_move = true,
            Some("position") => engine.set_position(&tokens),
            Some("go") => engine.go(&tokens, &mut out)?,
            Some("stop") => {
                if engine.searching {
                    engine.depth += 1;
                    engine.emit_round(&mut out, engine.depth)?;
                    engine.emit_bestmove(&mut out)?;
                }
            }
            Some("quit") => break,
            _ => {}
        }
        out.flush()?;
    }
    Ok(())
}
