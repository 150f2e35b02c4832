//! Engine configuration.
//!
//! Loaded from `config.json` in the data directory. Every field has a default,
//! so a missing file or a partial file is fine.

use crate::error::Result;
use gridrank_scanner::ProxyCandidate;
use gridrank_scanner::proxy::DEFAULT_TEST_URL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DATABASE_FILE_NAME: &str = "gridrank.db";

/// Fallback center when a scan is created without coordinates (Chicago).
pub const DEFAULT_LAT: f64 = 41.8781;
pub const DEFAULT_LNG: f64 = -87.6298;
pub const DEFAULT_RADIUS_KM: f64 = 5.0;
pub const DEFAULT_GRID_SIZE: i64 = 3;
const MAX_STALE_RUN_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON local-search endpoint used for rank lookups.
    pub search_endpoint: String,
    /// Point-of-interest endpoint for SMART scans.
    pub places_endpoint: Option<String>,
    pub probe_timeout_secs: u64,
    /// Grid points probed at once within one run.
    pub probe_concurrency: usize,
    pub use_proxies: bool,
    pub proxies: Vec<ProxyCandidate>,
    pub proxy_test_url: String,
    pub proxy_timeout_secs: u64,
    pub proxy_concurrency: usize,
    /// Minimum rank movement that raises an alert.
    pub alert_threshold: u32,
    pub smart_point_limit: usize,
    pub scheduler_interval_secs: u64,
    /// A RUNNING scan claimed longer ago than this, with no live run in the
    /// serving process, is put back in the queue.
    pub stale_run_secs: u64,
    pub default_lat: f64,
    pub default_lng: f64,
    pub default_radius: f64,
    pub default_grid_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_endpoint: "http://127.0.0.1:8787/search".to_string(),
            places_endpoint: None,
            probe_timeout_secs: 15,
            probe_concurrency: 4,
            use_proxies: false,
            proxies: Vec::new(),
            proxy_test_url: DEFAULT_TEST_URL.to_string(),
            proxy_timeout_secs: 5,
            proxy_concurrency: 10,
            alert_threshold: 3,
            smart_point_limit: 25,
            scheduler_interval_secs: 60,
            stale_run_secs: 3600,
            default_lat: DEFAULT_LAT,
            default_lng: DEFAULT_LNG,
            default_radius: DEFAULT_RADIUS_KM,
            default_grid_size: DEFAULT_GRID_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `path`, or return defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.search_endpoint = endpoint.into();
        self
    }

    pub fn with_places_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.places_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = concurrency;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<ProxyCandidate>) -> Self {
        self.use_proxies = !proxies.is_empty();
        self.proxies = proxies;
        self
    }

    pub fn with_proxy_test_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_test_url = url.into();
        self
    }

    pub fn with_alert_threshold(mut self, threshold: u32) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs.max(1))
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs.max(1))
    }

    pub fn with_stale_run_secs(mut self, secs: u64) -> Self {
        self.stale_run_secs = secs;
        self
    }

    pub fn stale_run_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_run_secs.clamp(1, MAX_STALE_RUN_SECS) as i64)
    }
}
