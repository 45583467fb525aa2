//! Host configuration, following the same load-or-create-default TOML
//! convention the donor SDK used for its own unified config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where the object store persists its four logical stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StoreBackend {
    Sqlite { path: PathBuf },
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsConfig {
    pub kms_home: PathBuf,
    pub store: StoreBackend,
    /// Stamped into every audit entry's `counters` record; distinguishes
    /// concurrently-running worker processes sharing one store.
    pub instance_id: String,
}

impl Default for KmsConfig {
    fn default() -> Self {
        let home = dirs::home_dir().expect("could not find home directory").join(".kms");
        Self { store: StoreBackend::Sqlite { path: home.join("kms.sqlite3") }, kms_home: home, instance_id: "default".to_string() }
    }
}

impl KmsConfig {
    /// Load from `~/.kms/config.toml`, writing out the default if absent.
    pub fn load() -> Result<Self> {
        let config_path = Self::default().kms_home.join("config.toml");
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.kms_home)?;
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(self.kms_home.join("config.toml"), contents)?;
        Ok(())
    }

    /// A config with no on-disk footprint, for tests and short-lived
    /// embeddings that never need the store to survive the process.
    pub fn in_memory(instance_id: impl Into<String>) -> Self {
        Self { store: StoreBackend::InMemory, instance_id: instance_id.into(), ..Self::default() }
    }
}
