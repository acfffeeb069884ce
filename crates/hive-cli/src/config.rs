//! Configuration system for the hive CLI.

use anyhow::Context;
use hive_core::RouterParams;
use hive_discovery::KadParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Hive configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Topology parameters
    #[serde(default)]
    pub kademlia: KademliaConfig,
    /// Router parameters
    #[serde(default)]
    pub router: RouterConfig,
    /// Simulation defaults
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Topology configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KademliaConfig {
    /// Minimum connected peers in the nearest neighbourhood
    #[serde(default = "default_neighbourhood_size")]
    pub neighbourhood_size: usize,
    /// Minimum connections per bin
    #[serde(default = "default_min_bin_size")]
    pub min_bin_size: usize,
    /// Cap on expected connections per bin
    #[serde(default = "default_max_bin_size")]
    pub max_bin_size: usize,
    /// Rows shown by the table display
    #[serde(default = "default_max_prox_display")]
    pub max_prox_display: usize,
    /// First redial interval in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Growth factor of the redial interval
    #[serde(default = "default_retry_exponent")]
    pub retry_exponent: u32,
    /// Dial attempts before a peer is dropped from suggestions
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Suggest peers covering the largest address gap
    #[serde(default)]
    pub prefer_address_gaps: bool,
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Envelope lifetime in seconds
    #[serde(default = "default_msg_ttl_secs")]
    pub msg_ttl_secs: u64,
    /// How long digests are remembered, in seconds
    #[serde(default = "default_digest_cache_ttl_secs")]
    pub digest_cache_ttl_secs: u64,
    /// Key cleanup interval in seconds
    #[serde(default = "default_clean_interval_secs")]
    pub clean_interval_secs: u64,
    /// Symmetric keys tried per incoming envelope
    #[serde(default = "default_sym_key_cache_capacity")]
    pub sym_key_cache_capacity: usize,
    /// Outbox slots
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Largest accepted encoded envelope in bytes
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: usize,
    /// Accept and send unsealed envelopes
    #[serde(default = "default_true")]
    pub allow_raw: bool,
    /// Advertise forwarding
    #[serde(default = "default_true")]
    pub allow_forward: bool,
}

/// Simulation defaults, overridden by command flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of simulated nodes
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Dial rounds
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    /// Seed for address generation; random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_neighbourhood_size() -> usize {
    2
}

fn default_min_bin_size() -> usize {
    2
}

fn default_max_bin_size() -> usize {
    16
}

fn default_max_prox_display() -> usize {
    16
}

fn default_retry_interval_ms() -> u64 {
    4200
}

fn default_retry_exponent() -> u32 {
    2
}

fn default_max_retries() -> u32 {
    42
}

fn default_msg_ttl_secs() -> u64 {
    120
}

fn default_digest_cache_ttl_secs() -> u64 {
    30
}

fn default_clean_interval_secs() -> u64 {
    600
}

fn default_sym_key_cache_capacity() -> usize {
    512
}

fn default_outbox_capacity() -> usize {
    50
}

fn default_max_msg_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_nodes() -> usize {
    32
}

fn default_rounds() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for KademliaConfig {
    fn default() -> Self {
        Self {
            neighbourhood_size: default_neighbourhood_size(),
            min_bin_size: default_min_bin_size(),
            max_bin_size: default_max_bin_size(),
            max_prox_display: default_max_prox_display(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_exponent: default_retry_exponent(),
            max_retries: default_max_retries(),
            prefer_address_gaps: false,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            msg_ttl_secs: default_msg_ttl_secs(),
            digest_cache_ttl_secs: default_digest_cache_ttl_secs(),
            clean_interval_secs: default_clean_interval_secs(),
            sym_key_cache_capacity: default_sym_key_cache_capacity(),
            outbox_capacity: default_outbox_capacity(),
            max_msg_size: default_max_msg_size(),
            allow_raw: true,
            allow_forward: true,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            rounds: default_rounds(),
            seed: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Topology parameters.
    #[must_use]
    pub fn kad_params(&self) -> KadParams {
        let k = &self.kademlia;
        KadParams {
            neighbourhood_size: k.neighbourhood_size,
            min_bin_size: k.min_bin_size,
            max_bin_size: k.max_bin_size,
            max_prox_display: k.max_prox_display,
            retry_interval: Duration::from_millis(k.retry_interval_ms),
            retry_exponent: k.retry_exponent,
            max_retries: k.max_retries,
            prefer_address_gaps: k.prefer_address_gaps,
            ..KadParams::default()
        }
    }

    /// Router parameters.
    #[must_use]
    pub fn router_params(&self) -> RouterParams {
        let r = &self.router;
        RouterParams {
            msg_ttl: Duration::from_secs(r.msg_ttl_secs),
            digest_cache_ttl: Duration::from_secs(r.digest_cache_ttl_secs),
            clean_interval: Duration::from_secs(r.clean_interval_secs),
            sym_key_cache_capacity: r.sym_key_cache_capacity,
            outbox_capacity: r.outbox_capacity,
            max_msg_size: r.max_msg_size,
            allow_raw: r.allow_raw,
            allow_forward: r.allow_forward,
            ..RouterParams::default()
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.kad_params()
            .validate()
            .context("invalid [kademlia] section")?;
        self.router_params()
            .validate()
            .context("invalid [router] section")?;

        if self.simulation.nodes < 2 {
            anyhow::bail!("simulation needs at least 2 nodes");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
