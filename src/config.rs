use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::history::{HistoryError, HistoryOptions, HistoryResult, Registry};
use crate::store::{KeyKind, MemoryStore, TableSpec};

#[derive(Parser, Debug)]
#[command(
    name = "revisionist",
    about = "Replay resource mutations through the history engine"
)]
pub struct Cli {
    /// JSON replay script (a list of steps)
    pub script: PathBuf,

    /// History configuration file (defaults to <config dir>/revisionist/config.toml)
    #[arg(long, env = "REVISIONIST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log file path (logs go to stderr otherwise)
    #[arg(long, env = "REVISIONIST_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Pretty-print step reports
    #[arg(long)]
    pub pretty: bool,
}

/// `[defaults]` apply to every type; `[types.<name>]` override them.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: HistoryOptions,
    #[serde(default)]
    pub types: BTreeMap<String, HistoryOptions>,
}

impl ConfigFile {
    /// Reads the file at the default location. A missing file is `None`; a
    /// file that fails to parse is an error.
    pub fn load() -> HistoryResult<Option<Self>> {
        match dirs::config_dir() {
            Some(config_dir) => {
                Self::load_from(&config_dir.join("revisionist").join("config.toml"))
            }
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> HistoryResult<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HistoryError::InvalidConfiguration(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn read(path: &Path) -> HistoryResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HistoryError::InvalidConfiguration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> HistoryResult<Self> {
        toml::from_str(content).map_err(|e| HistoryError::InvalidConfiguration(e.to_string()))
    }

    /// Resolves every configured type. Fails on the first invalid one.
    pub fn registry(&self) -> HistoryResult<Registry> {
        let mut registry = Registry::new(self.defaults.clone())?;
        for (kind, options) in &self.types {
            registry.register(kind, options.clone())?;
        }
        Ok(registry)
    }

    /// In-memory store with a serial-keyed table per configured type and
    /// every history table the registry uses.
    pub fn provision(&self, registry: &Registry) -> MemoryStore {
        let mut store = MemoryStore::new();
        for (kind, options) in &self.types {
            let id_attribute = self
                .defaults
                .merged(options)
                .id_attribute
                .unwrap_or_else(|| "id".to_string());
            store = store.with_table(kind.clone(), TableSpec::new().key(id_attribute, KeyKind::Serial));
        }
        for storage in registry.storages() {
            store = store.with_table(storage.table.clone(), storage.table_spec());
        }
        store
    }
}
