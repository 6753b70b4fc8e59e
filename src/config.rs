//! Configuration
//!
//! Layered with the `config` crate. Later layers win:
//!
//! 1. built-in defaults
//! 2. the per-user file, `<config dir>/catfs/catfs.toml`
//! 3. `<root>/catfs.toml`
//! 4. environment variables, `CATFS_<SECTION>__<KEY>`, e.g. `CATFS_STORAGE__BACKEND=sled`

use crate::error::{CatfsError, Result};
use crate::linker::Linker;
use crate::logging::{LogOutput, LoggingConfig};
use crate::store::{Database, SledBackend};
use crate::vcs::SyncConfig;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "catfs.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Everything is lost on drop; for tests and dry runs
    Memory,
    #[default]
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database directory, relative to the repository root unless absolute
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sled,
            path: PathBuf::from(".catfs/db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Also sweep objects no longer reachable from any commit
    pub all_objects: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatfsConfig {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub gc: GcConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Storage(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "storage: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl StorageConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.backend == StorageBackend::Sled && self.path.as_os_str().is_empty() {
            return Err("sled backend needs a database path".to_string());
        }
        Ok(())
    }

    /// Database location for a repository at `root`
    pub fn resolve_path(&self, root: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            root.join(&self.path)
        }
    }
}

impl CatfsConfig {
    /// Load all layers for the repository at `root`
    pub fn load(root: &Path) -> Result<Self> {
        ConfigLoader::new(root).load()
    }

    /// Read a single file on top of the defaults, no other layers
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(Config::try_from(&CatfsConfig::default())?)
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(msg) = self.storage.validate() {
            errors.push(ValidationError::Storage(msg));
        }

        if let Err(msg) = self.logging.validate() {
            errors.push(ValidationError::Logging(msg));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Write the defaults to `<root>/catfs.toml` unless the file exists
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Ok(path);
        }

        let rendered = toml::to_string_pretty(&CatfsConfig::default())
            .map_err(|err| CatfsError::Config(format!("cannot render defaults: {}", err)))?;
        std::fs::write(&path, rendered).map_err(|err| {
            CatfsError::Config(format!("cannot write {}: {}", path.display(), err))
        })?;

        debug!(path = %path.display(), "Wrote default config");
        Ok(path)
    }

    /// Open the configured key-value store for the repository at `root`
    pub fn open_database(&self, root: &Path) -> Result<Arc<Database>> {
        let db = match self.storage.backend {
            StorageBackend::Memory => Database::memory(),
            StorageBackend::Sled => {
                let path = self.storage.resolve_path(root);
                debug!(path = %path.display(), "Opening sled database");
                Database::new(Box::new(SledBackend::new(path)?))
            }
        };
        Ok(Arc::new(db))
    }

    pub fn open_linker(&self, root: &Path) -> Result<Linker> {
        Ok(Linker::new(self.open_database(root)?))
    }

    /// Make a relative log file path relative to `root`
    pub fn resolve_log_file(&mut self, root: &Path) {
        if self.logging.output == LogOutput::File && self.logging.file.is_relative() {
            self.logging.file = root.join(&self.logging.file);
        }
    }
}

/// Per-user configuration file, if the platform has a config directory
pub fn global_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "catfs").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Builder over the configuration layers
pub struct ConfigLoader {
    root: PathBuf,
    global_file: Option<PathBuf>,
    overrides: Vec<(String, String)>,
}

impl ConfigLoader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            global_file: global_config_path(),
            overrides: Vec::new(),
        }
    }

    /// Use another per-user file, or none at all
    pub fn global_file(mut self, path: Option<PathBuf>) -> Self {
        self.global_file = path;
        self
    }

    /// Set a dotted key, e.g. `storage.backend`, above every other layer
    pub fn set_override(mut self, key: &str, value: &str) -> Self {
        self.overrides.push((key.to_string(), value.to_string()));
        self
    }

    pub fn load(self) -> Result<CatfsConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&CatfsConfig::default())?);

        if let Some(global) = &self.global_file {
            if global.exists() {
                debug!(path = %global.display(), "Using global config");
                builder = builder.add_source(File::from(global.as_path()).required(false));
            }
        }

        let local = self.root.join(CONFIG_FILE_NAME);
        if local.exists() {
            debug!(path = %local.display(), "Using repository config");
            builder = builder.add_source(File::from(local.as_path()).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("CATFS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in self.overrides {
            builder = builder.set_override(key, value)?;
        }

        let cfg: CatfsConfig = builder.build()?.try_deserialize()?;
        cfg.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(ToString::to_string).collect();
            CatfsError::Config(format!("invalid configuration:\n{}", msgs.join("\n")))
        })?;

        Ok(cfg)
    }
}
