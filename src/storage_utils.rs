use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::engine::{EngineConfig, ScanConfig};
use crate::indicators::{IndicatorConfig, RatingConfig};
use crate::patterns::PatternDefaults;

pub const CONFIG_FILE: &str = "config";

// CONFIGURATION STRUCTS
// Every section falls back to its defaults, so a partial config.json is fine.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KlineConfig {
    pub lookback: u32,             // bars requested per fetch, e.g. 100
    pub request_timeout_secs: u64, // per HTTP request
}

impl Default for KlineConfig {
    fn default() -> Self {
        Self {
            lookback: 100,
            request_timeout_secs: 10,
        }
    }
}

impl KlineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TradingConfig {
    pub quote_asset: String, // e.g., "USDT"
    pub max_universe: usize, // symbols per exchange after sorting
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            max_universe: 150,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub klines: KlineConfig,
    pub trading: TradingConfig,
    pub indicators: IndicatorConfig,
    pub rating: RatingConfig,
    pub patterns: PatternDefaults,
    pub scan: ScanConfig,
}

impl AppConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            indicators: self.indicators,
            rating: self.rating,
            patterns: self.patterns,
            scan: self.scan,
            lookback: self.klines.lookback as usize,
        }
    }

    /// Loads `config.json`, or the defaults when there is none yet.
    pub async fn load_or_default(storage: &AsyncStorageManager) -> anyhow::Result<Self> {
        if !storage.exists(CONFIG_FILE).await {
            info!(dir = ?storage.base_dir, "no config.json found, using defaults");
            return Ok(Self::default());
        }
        storage.load(CONFIG_FILE).await.inspect_err(|e| {
            warn!(error = %e, "config.json could not be parsed");
        })
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path of the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage directory next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// Storage rooted at an explicit directory, created if missing.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        // Create up front so later saves never have to check.
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    fn path_of(&self, filename: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", filename))
    }

    pub async fn exists(&self, filename: &str) -> bool {
        fs::try_exists(self.path_of(filename)).await.unwrap_or(false)
    }

    /// Atomic write: serialize to `<name>.json.tmp`, then rename over the target.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let final_path = self.path_of(filename);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", filename));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        // serde_json validates while parsing, no need for read_to_string
        let content = fs::read(self.path_of(filename)).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }
}
