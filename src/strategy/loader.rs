//! Strategy discovery: mirrors the Exchange Adapter loader — manifests are read and
//! validated, never dynamically linked; `load` resolves a known id to a constructor.

use super::echo::EchoBuyAtTick;
use super::Strategy;
use crate::error::{WeaverError, WeaverResult};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

pub struct StrategyLoader {
    manifest_dir: PathBuf,
}

impl StrategyLoader {
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
        }
    }

    pub fn list_available(&self) -> Vec<StrategyMetadata> {
        let Ok(entries) = std::fs::read_dir(&self.manifest_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .filter_map(|path| match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable strategy manifest");
                        None
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read strategy manifest");
                    None
                }
            })
            .collect()
    }

    pub fn get_metadata(&self, id: &str) -> WeaverResult<StrategyMetadata> {
        self.list_available()
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| WeaverError::NotFound(format!("no strategy manifest for {id}")))
    }

    pub fn load(&self, id: &str) -> WeaverResult<Box<dyn Strategy>> {
        self.get_metadata(id)?;
        match id {
            "echo_buy_at_tick" => Ok(Box::new(EchoBuyAtTick::new())),
            other => Err(WeaverError::NotFound(format!(
                "no constructor registered for strategy id {other}"
            ))),
        }
    }
}
