//! Service configuration: file, then environment overrides, then validation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use folio_storage::{LocalStore, S3Config, S3Store, StorageProvider};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};
use crate::pipeline::PipelineConfig;

/// Namespace identifiers derive from unless configured otherwise.
pub const DEFAULT_ASSET_NAMESPACE: &str = "570e8400-c29b-45d4-a716-446655440700";

/// Where assets and variants live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// A directory on the local filesystem.
    Local {
        /// Root every key is confined to.
        root: PathBuf,
    },
    /// An S3-compatible bucket.
    S3(S3Config),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: PathBuf::from("./storage"),
        }
    }
}

/// Top-level configuration of the asset service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// Local directory of source images uploaded at startup.
    pub sources_dir: PathBuf,
    /// UUID namespace asset identifiers derive from.
    pub asset_namespace: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Upload `sources_dir` into the store before serving.
    pub sync_on_start: bool,
    /// Worker pool settings.
    pub pipeline: PipelineConfig,
    /// Storage backend.
    pub storage: StorageConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            sources_dir: PathBuf::from("./sources"),
            asset_namespace: DEFAULT_ASSET_NAMESPACE.to_string(),
            log_level: "info".to_string(),
            sync_on_start: true,
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl MediaConfig {
    /// Loads a TOML or JSON file, chosen by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Applies `FOLIO_*` environment overrides.
    pub fn apply_env(&mut self) -> MediaResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> MediaResult<()> {
        if let Some(addr) = lookup("FOLIO_BIND_ADDR") {
            self.bind_addr = addr
                .parse()
                .map_err(|e| MediaError::Config(format!("FOLIO_BIND_ADDR {addr:?}: {e}")))?;
        }
        if let Some(dir) = lookup("FOLIO_SOURCES_DIR") {
            self.sources_dir = PathBuf::from(dir);
        }
        if let Some(namespace) = lookup("FOLIO_ASSET_NAMESPACE") {
            self.asset_namespace = namespace;
        }
        if let StorageConfig::S3(s3) = &mut self.storage {
            if let Some(key) = lookup("FOLIO_S3_ACCESS_KEY") {
                s3.access_key = key;
            }
            if let Some(secret) = lookup("FOLIO_S3_SECRET_KEY") {
                s3.secret_key = secret;
            }
        }
        Ok(())
    }

    /// Parsed identifier namespace.
    pub fn namespace(&self) -> MediaResult<Uuid> {
        Uuid::parse_str(&self.asset_namespace).map_err(|e| {
            MediaError::Config(format!("asset_namespace {:?}: {e}", self.asset_namespace))
        })
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> MediaResult<()> {
        self.namespace()?;
        if self.pipeline.queue_capacity == 0 {
            return Err(MediaError::Config("pipeline.queue_capacity must be > 0".into()));
        }
        if self.pipeline.job_timeout_secs == 0 {
            return Err(MediaError::Config("pipeline.job_timeout_secs must be > 0".into()));
        }
        match &self.storage {
            StorageConfig::Local { root } if root.as_os_str().is_empty() => {
                Err(MediaError::Config("storage.root must not be empty".into()))
            }
            StorageConfig::S3(s3) if s3.bucket.trim().is_empty() => {
                Err(MediaError::Config("storage.bucket must not be empty".into()))
            }
            StorageConfig::S3(s3) if s3.endpoint.trim().is_empty() => {
                Err(MediaError::Config("storage.endpoint must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// Opens the configured backend.
    pub fn build_store(&self) -> MediaResult<Arc<dyn StorageProvider>> {
        let store: Arc<dyn StorageProvider> = match &self.storage {
            StorageConfig::Local { root } => Arc::new(LocalStore::new(root)?),
            StorageConfig::S3(s3) => Arc::new(S3Store::new(s3)),
        };
        Ok(store)
    }
}
