use std::time::Duration;

use serde::Deserialize;

use crate::aggregation::TickBudget;
use crate::error::ConfigError;
use crate::priority::PriorityWeights;

pub const CONFIG_VERSION: u32 = 1;

/// Smallest MTU the reliable-UDP layer negotiates.
pub const MIN_DATAGRAM_BYTES: usize = 400;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

// ─── Input (TOML) ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigInput {
    pub version: u32,
    pub tick_interval_ms: Option<u64>,
    pub max_datagram_bytes: Option<usize>,
    pub tick_budget_records: Option<usize>,
    pub tick_budget_bytes: Option<usize>,
    pub starvation_threshold: Option<u32>,
    pub weights: Option<WeightsInput>,
    pub max_datagrams_per_second: Option<u32>,
    pub event_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WeightsInput {
    pub high: Option<u32>,
    pub medium: Option<u32>,
    pub low: Option<u32>,
}

// ─── Resolved ────────────────────────────────────────────────────────────────

/// Scheduler settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub version: u32,
    /// Flush cadence of the buffered classes.
    pub tick_interval: Duration,
    /// Path MTU estimate; no datagram exceeds it.
    pub max_datagram_bytes: usize,
    pub tick_budget: TickBudget,
    /// Debt strictly above this earns a guaranteed slot.
    pub starvation_threshold: u32,
    pub weights: PriorityWeights,
    /// Ceiling on datagrams handed to the transport per second.
    pub max_datagrams_per_second: Option<u32>,
    /// Bound of the diagnostic event channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            version: CONFIG_VERSION,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_datagram_bytes: 1464,
            tick_budget: TickBudget::default(),
            starvation_threshold: 0,
            weights: PriorityWeights::default(),
            max_datagrams_per_second: None,
            event_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        if !(MIN_DATAGRAM_BYTES..=MAX_DATAGRAM_BYTES).contains(&self.max_datagram_bytes) {
            return Err(ConfigError::DatagramSize {
                value: self.max_datagram_bytes,
                min: MIN_DATAGRAM_BYTES,
                max: MAX_DATAGRAM_BYTES,
            });
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Zero("tick_interval_ms"));
        }
        if self.tick_budget.max_records == 0 {
            return Err(ConfigError::Zero("tick_budget_records"));
        }
        if self.tick_budget.max_bytes == Some(0) {
            return Err(ConfigError::Zero("tick_budget_bytes"));
        }
        if self.weights.high == 0 {
            return Err(ConfigError::Zero("weights.high"));
        }
        if self.weights.medium == 0 {
            return Err(ConfigError::Zero("weights.medium"));
        }
        if self.weights.low == 0 {
            return Err(ConfigError::Zero("weights.low"));
        }
        if self.max_datagrams_per_second == Some(0) {
            return Err(ConfigError::Zero("max_datagrams_per_second"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero("event_capacity"));
        }
        Ok(())
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(SchedulerConfig::default());
        }
        let parsed: SchedulerConfigInput =
            toml::from_str(input).map_err(|e| ConfigError::Toml(e.to_string()))?;
        parsed.resolve()
    }
}

impl SchedulerConfigInput {
    pub fn resolve(self) -> Result<SchedulerConfig, ConfigError> {
        let defaults = SchedulerConfig::default();
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };

        let weights = match self.weights {
            Some(w) => PriorityWeights {
                high: w.high.unwrap_or(defaults.weights.high),
                medium: w.medium.unwrap_or(defaults.weights.medium),
                low: w.low.unwrap_or(defaults.weights.low),
            },
            None => defaults.weights,
        };

        let config = SchedulerConfig {
            version,
            tick_interval: self
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            max_datagram_bytes: self
                .max_datagram_bytes
                .unwrap_or(defaults.max_datagram_bytes),
            tick_budget: TickBudget {
                max_records: self
                    .tick_budget_records
                    .unwrap_or(defaults.tick_budget.max_records),
                max_bytes: self.tick_budget_bytes,
            },
            starvation_threshold: self
                .starvation_threshold
                .unwrap_or(defaults.starvation_threshold),
            weights,
            max_datagrams_per_second: self.max_datagrams_per_second,
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
        };
        config.validate()?;
        Ok(config)
    }
}
