//! Daemon configuration (TOML).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineSettings};
use crate::errors::{Error, Result};
use crate::logging::LogConfig;
use crate::market::Market;
use crate::runtime::ReactorTimers;
use crate::transport::Transport;

/// Per-market automation settings block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSettingsEntry {
    pub market: String,
    #[serde(default)]
    pub order_min: i64,
    #[serde(default)]
    pub order_max: i64,
    #[serde(default)]
    pub order_dc: i64,
    #[serde(default)]
    pub order_dc_nice: i64,
    #[serde(default)]
    pub landmark_start: i64,
    #[serde(default)]
    pub landmark_thresh: i64,
    #[serde(default)]
    pub market_sentiment: bool,
    #[serde(default)]
    pub market_offset: f64,
    /// Optional saved-index file to replay at startup.
    #[serde(default)]
    pub index_file: Option<String>,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub engine: EngineSettings,
    pub logging: LogConfig,
    pub timers: ReactorTimers,
    #[serde(rename = "market")]
    pub markets: Vec<MarketSettingsEntry>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<DaemonConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("couldn't read {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::config(e.to_string()))
    }

    /// A commented starting point for a new deployment.
    pub fn sample_toml() -> String {
        let sample = DaemonConfig {
            markets: vec![MarketSettingsEntry {
                market: "BTC-USDT".to_string(),
                order_min: 5,
                order_max: 12,
                order_dc: 3,
                order_dc_nice: 0,
                landmark_start: 0,
                landmark_thresh: 2,
                market_sentiment: false,
                market_offset: 0.0,
                index_file: Some("index-BTC-USDT.txt".to_string()),
            }],
            ..DaemonConfig::default()
        };
        toml::to_string_pretty(&sample).unwrap_or_default()
    }

    /// Apply the per-market blocks to an engine and replay any saved
    /// index files. Returns the number of replayed `setorder` lines.
    pub fn apply_markets<T: Transport>(&self, engine: &mut Engine<T>) -> Result<usize> {
        let mut applied = 0usize;
        for entry in &self.markets {
            let market =
                Market::normalized(&entry.market, engine.settings().market_naming);
            engine.set_market_settings(
                market,
                entry.order_min,
                entry.order_max,
                entry.order_dc,
                entry.order_dc_nice,
                entry.landmark_start,
                entry.landmark_thresh,
                entry.market_sentiment,
                entry.market_offset,
            );
            if let Some(file) = &entry.index_file {
                applied += engine.load_market_file(Path::new(file))?;
            }
        }
        Ok(applied)
    }
}
