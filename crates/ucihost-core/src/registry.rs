//! 設定済みエンジンの一覧と、起動時の疎通確認 (probe)。

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::{EngineSettings, HostConfig};
use crate::engine::UciEngine;
use crate::option::OptionRegistry;

/// probe で判明した実行時情報。1 度だけ書き込まれる。
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    pub ready: bool,
    pub uci_name: Option<String>,
    pub uci_author: Option<String>,
    pub options: OptionRegistry,
}

#[derive(Debug)]
pub struct EngineDefinition {
    /// 設定ファイル上の名前。`uci` ヘッダの `id name` にもこれを使う。
    pub name: String,
    pub path: String,
    pub is_default: bool,
    pub resolved_path: PathBuf,
    selected: bool,
    probe: OnceLock<EngineProbe>,
}

impl EngineDefinition {
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn probe(&self) -> Option<&EngineProbe> {
        self.probe.get()
    }

    pub fn is_ready(&self) -> bool {
        self.probe().is_some_and(|p| p.ready)
    }

    fn record(&self, probe: EngineProbe) {
        if self.probe.set(probe).is_err() {
            warn!("engine `{}` was probed twice; keeping the first result", self.name);
        }
    }

    async fn run_probe(&self, settings: &EngineSettings) -> EngineProbe {
        if !self.resolved_path.is_file() {
            warn!("engine `{}` not found at {}", self.name, self.resolved_path.display());
            return EngineProbe::default();
        }
        match UciEngine::start(&self.resolved_path, self.name.clone(), settings).await {
            Ok(engine) => {
                let identity = engine.identity();
                let probe = EngineProbe {
                    ready: true,
                    uci_name: identity.name,
                    uci_author: identity.author,
                    options: engine.options(),
                };
                engine.dispose().await;
                info!(
                    "engine `{}` ready ({}, {} options)",
                    self.name,
                    probe.uci_name.as_deref().unwrap_or("unnamed"),
                    probe.options.len()
                );
                probe
            }
            Err(e) => {
                warn!("engine `{}` failed to start: {}", self.name, e);
                EngineProbe::default()
            }
        }
    }
}

/// エンジン定義の集合。選択規則は「最初の `default = true`、無ければ先頭」。
pub struct EngineRegistry {
    definitions: Vec<Arc<EngineDefinition>>,
    settings: EngineSettings,
    setup_done: watch::Sender<bool>,
}

impl EngineRegistry {
    pub fn from_config(config: &HostConfig) -> Self {
        let mut has_selected = false;
        let mut definitions: Vec<EngineDefinition> = config
            .usable_engines()
            .map(|entry| {
                let selected = !has_selected && entry.default;
                has_selected |= selected;
                EngineDefinition {
                    name: entry.name.clone(),
                    path: entry.path.clone(),
                    is_default: entry.default,
                    resolved_path: config.engines_dir.join(&entry.path),
                    selected,
                    probe: OnceLock::new(),
                }
            })
            .collect();
        if !has_selected {
            if let Some(first) = definitions.first_mut() {
                first.selected = true;
            }
        }

        let (setup_done, _) = watch::channel(definitions.is_empty());
        Self {
            definitions: definitions.into_iter().map(Arc::new).collect(),
            settings: config.engine.clone(),
            setup_done,
        }
    }

    pub fn definitions(&self) -> &[Arc<EngineDefinition>] {
        &self.definitions
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 設定上で選択されているエンジン（probe 結果は問わない）。
    pub fn selected(&self) -> Option<&Arc<EngineDefinition>> {
        self.definitions.iter().find(|d| d.is_selected())
    }

    /// 解析に使うエンジン。選択済みが使えなければ、使える最初のエンジンに切り替える。
    pub fn current(&self) -> Option<Arc<EngineDefinition>> {
        self.selected()
            .filter(|d| d.is_ready())
            .or_else(|| self.definitions.iter().find(|d| d.is_ready()))
            .cloned()
    }

    /// 全エンジンを並行に起動して情報を集め、すぐに終了させる。
    pub async fn setup_engines(&self) {
        let mut probes = JoinSet::new();
        for definition in &self.definitions {
            let definition = Arc::clone(definition);
            let settings = self.settings.clone();
            probes.spawn(async move {
                let probe = definition.run_probe(&settings).await;
                definition.record(probe);
            });
        }
        while let Some(result) = probes.join_next().await {
            if let Err(e) = result {
                warn!("engine probe task failed: {}", e);
            }
        }
        // panic した probe の分は not-ready として確定させる
        for definition in &self.definitions {
            if definition.probe().is_none() {
                definition.record(EngineProbe::default());
            }
        }

        match self.current() {
            Some(current) => info!("current engine: {}", current.name),
            None => warn!("no engine is ready"),
        }
        self.setup_done.send_replace(true);
    }

    pub fn is_setup_done(&self) -> bool {
        *self.setup_done.borrow()
    }

    /// probe の完了を待つ。時間内に終われば `true`。
    pub async fn wait_setup(&self, timeout: Duration) -> bool {
        let mut rx = self.setup_done.subscribe();
        matches!(tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await, Ok(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineEntry;

    fn entry(name: &str, default: bool) -> EngineEntry {
        EngineEntry { name: name.into(), path: format!("{name}.exe"), default }
    }

    fn config(engines: Vec<EngineEntry>) -> HostConfig {
        HostConfig { engines, engines_dir: PathBuf::from("/opt/engines"), ..HostConfig::default() }
    }

    #[test]
    fn first_default_entry_is_selected() {
        let registry =
            EngineRegistry::from_config(&config(vec![entry("a", false), entry("b", true), entry("c", true)]));
        let selected: Vec<&str> = registry
            .definitions()
            .iter()
            .filter(|d| d.is_selected())
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(selected, vec!["b"]);
        assert_eq!(registry.definitions()[1].resolved_path, PathBuf::from("/opt/engines/b.exe"));
    }

    #[test]
    fn first_entry_is_selected_without_default() {
        let registry = EngineRegistry::from_config(&config(vec![entry("a", false), entry("b", false)]));
        assert_eq!(registry.selected().map(|d| d.name.as_str()), Some("a"));
        assert!(registry.current().is_none());
    }

    #[test]
    fn current_falls_back_to_first_ready_engine() {
        let registry = EngineRegistry::from_config(&config(vec![entry("a", true), entry("b", false)]));
        registry.definitions()[0].record(EngineProbe::default());
        registry.definitions()[1].record(EngineProbe { ready: true, ..EngineProbe::default() });
        assert_eq!(registry.current().map(|d| d.name.clone()), Some("b".to_string()));
    }

    #[tokio::test]
    async fn missing_executables_are_marked_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig {
            engines: vec![entry("ghost", true)],
            engines_dir: dir.path().to_path_buf(),
            ..HostConfig::default()
        };
        let registry = EngineRegistry::from_config(&config);
        assert!(!registry.is_setup_done());
        registry.setup_engines().await;
        assert!(registry.is_setup_done());
        assert!(registry.wait_setup(Duration::from_millis(10)).await);
        assert!(!registry.definitions()[0].is_ready());
        assert!(registry.current().is_none());
    }

    #[tokio::test]
    async fn empty_registry_is_set_up_immediately() {
        let registry = EngineRegistry::from_config(&HostConfig::default());
        assert!(registry.wait_setup(Duration::from_millis(10)).await);
    }
}
