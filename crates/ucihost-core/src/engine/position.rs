//! `position` コマンドの組み立てと手番の導出。
//!
//! 盤面の合法性は検査しない。FEN のフィールド数と手番フィールドだけを確認する。

use crate::error::EngineError;

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// FEN の手番フィールドから白番かどうかを返す。
pub fn side_to_move(fen: &str) -> Result<bool, EngineError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(EngineError::InvalidPosition(format!("not enough FEN fields: `{fen}`")));
    }
    match fields[1].to_ascii_lowercase().as_str() {
        "w" => Ok(true),
        "b" => Ok(false),
        other => Err(EngineError::InvalidPosition(format!("unknown side to move `{other}`"))),
    }
}

/// 指し手列を適用した後の手番。奇数手なら反転する。
pub fn side_to_move_after(fen: &str, moves: &[String]) -> Result<bool, EngineError> {
    Ok(side_to_move(fen)? ^ (moves.len() % 2 == 1))
}

/// エンジンへ送る `position fen ...` 行。
pub fn position_command(fen: &str, moves: &[String]) -> String {
    if moves.is_empty() {
        format!("position fen {fen}")
    } else {
        format!("position fen {fen} moves {}", moves.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reads_side_to_move_field() {
        assert!(side_to_move(STARTPOS_FEN).unwrap());
        assert!(!side_to_move("8/8/8/8/8/8/8/K1k5 b - - 0 40").unwrap());
        assert!(side_to_move("8/8/8/8/8/8/8/K1k5 W -").unwrap());
    }

    #[test]
    fn rejects_short_or_unknown_side() {
        assert!(matches!(side_to_move("8/8/8/8/8/8/8/K1k5 w"), Err(EngineError::InvalidPosition(_))));
        assert!(matches!(side_to_move(""), Err(EngineError::InvalidPosition(_))));
        assert!(matches!(
            side_to_move("8/8/8/8/8/8/8/K1k5 x - - 0 1"),
            Err(EngineError::InvalidPosition(_))
        ));
    }

    #[test]
    fn formats_position_command() {
        assert_eq!(position_command("F w - -", &[]), "position fen F w - -");
        let moves = vec!["e2e4".to_string(), "e7e5".to_string()];
        assert_eq!(position_command("F w - -", &moves), "position fen F w - - moves e2e4 e7e5");
    }

    proptest! {
        #[test]
        fn side_after_moves_is_xor_of_parity(
            white in any::<bool>(),
            moves in prop::collection::vec("[a-h][1-8][a-h][1-8]", 0..12),
        ) {
            let fen = format!("8/8/8/8/8/8/8/K1k5 {} - - 0 1", if white { "w" } else { "b" });
            let after = side_to_move_after(&fen, &moves).unwrap();
            prop_assert_eq!(after, white ^ (moves.len() % 2 == 1));
        }

        #[test]
        fn invalid_side_field_is_rejected(side in "[a-zA-Z0-9]{1,3}") {
            prop_assume!(!side.eq_ignore_ascii_case("w") && !side.eq_ignore_ascii_case("b"));
            let fen = format!("8/8/8/8/8/8/8/K1k5 {side} - - 0 1");
            prop_assert!(side_to_move(&fen).is_err());
        }
    }
}
