//! Adapter discovery: scans a directory of manifest files and exposes their metadata.
//!
//! Loading is intentionally syntactic — manifests are read and validated, never executed
//! or dynamically linked. `load` resolves an id to one of the adapter constructors known
//! at compile time; a manifest for an id with no matching constructor is listed but not
//! loadable.

use crate::bar_repository::BarRepository;
use crate::error::{WeaverError, WeaverResult};
use crate::exchange::live::{LiveAdapter, LiveCredentials};
use crate::exchange::mock::MockAdapter;
use crate::exchange::simulated::SimulatedAdapter;
use crate::exchange::ExchangeAdapter;
use crate::fill_simulator::FillSimulator;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub features: Vec<String>,
}

impl AdapterMetadata {
    pub fn supports_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

pub struct AdapterLoader {
    manifest_dir: PathBuf,
    bar_repository: Arc<dyn BarRepository>,
    fill_sim_config: crate::fill_simulator::FillSimConfig,
}

impl AdapterLoader {
    pub fn new(
        manifest_dir: impl Into<PathBuf>,
        bar_repository: Arc<dyn BarRepository>,
        fill_sim_config: crate::fill_simulator::FillSimConfig,
    ) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            bar_repository,
            fill_sim_config,
        }
    }

    fn manifest_paths(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.manifest_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect()
    }

    fn read_manifest(path: &Path) -> WeaverResult<AdapterMetadata> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("{}: {e}", path.display())))?;
        toml_manifest(&contents)
    }

    pub fn list_available(&self) -> Vec<AdapterMetadata> {
        self.manifest_paths()
            .into_iter()
            .filter_map(|path| match Self::read_manifest(&path) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable adapter manifest");
                    None
                }
            })
            .collect()
    }

    pub fn get_metadata(&self, id: &str) -> WeaverResult<AdapterMetadata> {
        self.list_available()
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| WeaverError::NotFound(format!("no adapter manifest for {id}")))
    }

    pub fn supports_feature(&self, id: &str, feature: &str) -> WeaverResult<bool> {
        Ok(self.get_metadata(id)?.supports_feature(feature))
    }

    /// Resolves a manifest id to a live instance. Known ids: `simulated`, `mock`, and
    /// `live:<base_url>` (credentials supplied separately by the caller).
    pub fn load(&self, id: &str, live_credentials: Option<LiveCredentials>) -> WeaverResult<Arc<dyn ExchangeAdapter>> {
        self.get_metadata(id)?;
        match id {
            "simulated" => Ok(Arc::new(SimulatedAdapter::new(
                id,
                self.bar_repository.clone(),
                FillSimulator::new(self.fill_sim_config),
                100_000.0,
            ))),
            "mock" => Ok(Arc::new(MockAdapter::new(id, 100.0))),
            other if other.starts_with("live") => {
                let creds = live_credentials.ok_or_else(|| {
                    WeaverError::Validation("live adapter requires credentials".into())
                })?;
                let meta = self.get_metadata(id)?;
                Ok(Arc::new(LiveAdapter::new(id, meta.name, creds)))
            }
            other => Err(WeaverError::NotFound(format!(
                "no constructor registered for adapter id {other}"
            ))),
        }
    }
}

fn toml_manifest(contents: &str) -> WeaverResult<AdapterMetadata> {
    toml::from_str(contents)
        .map_err(|e| WeaverError::Internal(anyhow::anyhow!("invalid adapter manifest: {e}")))
}
