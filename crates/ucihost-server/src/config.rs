//! 設定ファイルの読み込み。拡張子 `.json` なら JSON、それ以外は TOML として読む。

use std::path::Path;

use anyhow::Context;
use tracing::info;
use ucihost_core::HostConfig;

/// `path` から設定を読む。ファイルが無ければ既定値。
///
/// 相対パスの `engines_dir` は設定ファイルのあるディレクトリを基準に解決する。
pub fn load_config(path: &Path) -> anyhow::Result<HostConfig> {
    if !path.exists() {
        info!(path = %path.display(), "config file not found; using defaults");
        return Ok(HostConfig::default());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase());
    let mut config: HostConfig = match ext.as_deref() {
        Some("json") => serde_json::from_str(&data)
            .with_context(|| format!("invalid JSON config {}", path.display()))?,
        _ => toml::from_str(&data).with_context(|| format!("invalid TOML config {}", path.display()))?,
    };

    if config.engines_dir.is_relative() {
        if let Some(base) = path.parent() {
            config.engines_dir = base.join(&config.engines_dir);
        }
    }
    Ok(config)
}
