use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::route::Route;
use crate::simulator::SimulatorConfig;
use crate::supervisor::SupervisorSettings;

pub const API_URL_ENV: &str = "CONVOY_API_URL";
pub const STREAM_URL_ENV: &str = "CONVOY_STREAM_URL";

/// One waypoint of a configured route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Top-level configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_fleet_size")]
    pub fleet_size: usize,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    /// Overrides the built-in convoy route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Vec<WaypointConfig>>,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_stream_url() -> String {
    "ws://localhost:9090".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_fleet_size() -> usize {
    12
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            stream_url: default_stream_url(),
            probe_timeout_ms: default_probe_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            tick_interval_ms: default_tick_interval_ms(),
            fleet_size: default_fleet_size(),
            simulator: SimulatorConfig::default(),
            route: None,
        }
    }
}

impl SyncConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: SyncConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Apply environment overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps an env var name to its value
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup(STREAM_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.stream_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        if self.route.as_ref().is_some_and(|route| route.is_empty()) {
            bail!("route must contain at least one waypoint");
        }
        let sim = &self.simulator;
        for (name, value) in [
            ("simulator.step_rate", sim.step_rate),
            ("simulator.speed_multiplier", sim.speed_multiplier),
            ("simulator.battery_drain_rate", sim.battery_drain_rate),
            ("simulator.fuel_drain_rate", sim.fuel_drain_rate),
            ("simulator.health_jitter", sim.health_jitter),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, value);
            }
        }
        if !(0.0..=100.0).contains(&sim.health_floor) {
            bail!(
                "simulator.health_floor must be within 0..=100, got {}",
                sim.health_floor
            );
        }
        Ok(())
    }

    /// The configured route, or the built-in convoy route
    pub fn route(&self) -> Route {
        match &self.route {
            Some(points) => Route::from_points(
                points
                    .iter()
                    .map(|p| (p.name.clone(), p.latitude, p.longitude)),
            ),
            None => Route::default_convoy(),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            probe_timeout: self.probe_timeout(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            fleet_size: self.fleet_size,
        }
    }
}
