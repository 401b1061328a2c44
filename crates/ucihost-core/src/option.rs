//! エンジンが handshake 中に宣言する設定項目 (`option name ... type ...`) の登録簿。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseWarning;
use crate::util::is_keyword;

const OPTION_KEYWORDS: [&str; 6] = ["name", "type", "default", "min", "max", "var"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Check,
    Spin,
    Combo,
    Button,
    String,
}

impl OptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OptionKind::Check => "check",
            OptionKind::Spin => "spin",
            OptionKind::Combo => "combo",
            OptionKind::Button => "button",
            OptionKind::String => "string",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "check" => Ok(OptionKind::Check),
            "spin" => Ok(OptionKind::Spin),
            "combo" => Ok(OptionKind::Combo),
            "button" => Ok(OptionKind::Button),
            "string" => Ok(OptionKind::String),
            other => Err(format!("unknown option type `{other}`")),
        }
    }
}

/// エンジン設定項目 1 件。handshake で登録された後は不変。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOption {
    pub name: String,
    pub kind: OptionKind,
    pub default: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    /// combo の選択肢（宣言順）
    pub choices: Vec<String>,
}

impl EngineOption {
    /// `option` に続くトークン列を解釈する。
    ///
    /// `name` の値は次のキーワードが現れるまでの全トークンを空白で連結する
    /// （`Clear Hash` のように空白を含む名前があるため）。
    pub fn parse(tokens: &[&str]) -> Result<Self, ParseWarning> {
        let line = || format!("option {}", tokens.join(" "));
        let mut name_parts: Vec<&str> = Vec::new();
        let mut reading_name = false;
        let mut kind = None;
        let mut default = None;
        let mut min = None;
        let mut max = None;
        let mut choices = Vec::new();

        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            let value = tokens.get(i + 1).copied().filter(|next| !is_option_keyword(next));
            if is_keyword(token, "name") {
                reading_name = true;
                i += 1;
                continue;
            }
            if !is_option_keyword(token) {
                if reading_name {
                    name_parts.push(token);
                }
                i += 1;
                continue;
            }

            reading_name = false;
            match token.to_ascii_lowercase().as_str() {
                "type" => {
                    let raw = value.ok_or_else(|| ParseWarning::new("missing option type", line()))?;
                    kind = Some(raw.parse::<OptionKind>().map_err(|e| ParseWarning::new(e, line()))?);
                }
                "default" => default = value.map(str::to_string),
                "min" => min = value.and_then(|v| v.parse().ok()),
                "max" => max = value.and_then(|v| v.parse().ok()),
                "var" => {
                    if let Some(v) = value {
                        choices.push(v.to_string());
                    }
                }
                _ => unreachable!("is_option_keyword covers every arm"),
            }
            i += if value.is_some() { 2 } else { 1 };
        }

        if name_parts.is_empty() {
            return Err(ParseWarning::new("option declaration without name", line()));
        }
        let kind = kind.ok_or_else(|| ParseWarning::new("option declaration without type", line()))?;
        Ok(Self { name: name_parts.join(" "), kind, default, min, max, choices })
    }

    /// `uci` ヘッダとしてクライアントへ返す宣言行。
    pub fn to_uci_line(&self) -> String {
        let mut line = format!("option name {} type {}", self.name, self.kind);
        if let Some(default) = self.default.as_deref().filter(|d| !d.is_empty()) {
            line.push_str(" default ");
            line.push_str(default);
        }
        if let Some(min) = self.min {
            line.push_str(&format!(" min {min}"));
        }
        if let Some(max) = self.max {
            line.push_str(&format!(" max {max}"));
        }
        for choice in &self.choices {
            line.push_str(" var ");
            line.push_str(choice);
        }
        line
    }
}

fn is_option_keyword(token: &str) -> bool {
    OPTION_KEYWORDS.iter().any(|k| is_keyword(token, k))
}

/// 名前をキーにした設定項目の表。宣言順を保ち、同名の再宣言は上書きする。
/// 名前の照合は大文字小文字を区別しない。
#[derive(Debug, Clone, Default)]
pub struct OptionRegistry {
    options: Vec<EngineOption>,
    index: HashMap<String, usize>,
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, option: EngineOption) {
        let key = option.name.to_ascii_lowercase();
        match self.index.get(&key) {
            Some(&pos) => self.options[pos] = option,
            None => {
                self.index.insert(key, self.options.len());
                self.options.push(option);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&EngineOption> {
        self.index.get(&name.to_ascii_lowercase()).map(|&pos| &self.options[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineOption> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}
