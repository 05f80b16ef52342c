use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::entity::{Armament, EntityStatus, EntityUpdate, GeoPosition, TelemetryUpdate};
use crate::error::SyncError;
use crate::route::{Route, resolve};

/// One-shot calls against the convoy API server
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Ok when the server answered 2xx within the probe timeout
    async fn probe_health(&self) -> Result<(), SyncError>;

    /// Initial full read of the fleet, decoded into store updates
    async fn fetch_entities(&self, route: &Route) -> Result<Vec<(String, EntityUpdate)>>;

    async fn reset_mission(&self) -> Result<(), SyncError>;
}

/// HTTP client for the convoy API server
#[derive(Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRemoteApi {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn probe_health(&self) -> Result<(), SyncError> {
        let response = self
            .client
            .get(self.url("/health"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::ProbeTimeout
                } else {
                    SyncError::ProbeFailure(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::ProbeFailure(format!("HTTP {}", status)));
        }
        debug!(base_url = %self.base_url, "Health probe succeeded");
        Ok(())
    }

    async fn fetch_entities(&self, route: &Route) -> Result<Vec<(String, EntityUpdate)>> {
        let url = self.url("/api/v1/drones");
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Fleet read failed with HTTP {}: {}", status, body));
        }

        let listing: FleetListing = response
            .json()
            .await
            .context("Failed to parse fleet listing")?;

        let updates = listing.into_updates(route);
        info!(count = updates.len(), "Fetched initial fleet state");
        Ok(updates)
    }

    async fn reset_mission(&self) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.url("/api/v1/mission/reset"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SyncError::ResetCallFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::ResetCallFailure(format!("HTTP {}", status)));
        }
        info!("Remote mission reset accepted");
        Ok(())
    }
}

/// Body of `GET /api/v1/drones`
#[derive(Debug, Deserialize)]
pub struct FleetListing {
    #[serde(default)]
    pub drones: Vec<EntityDto>,
}

impl FleetListing {
    pub fn into_updates(self, route: &Route) -> Vec<(String, EntityUpdate)> {
        self.drones
            .into_iter()
            .filter_map(|dto| dto.into_update(route))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityDto {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub callsign: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub position: Option<DtoPosition>,
    #[serde(default)]
    pub telemetry: Option<DtoTelemetry>,
    #[serde(default)]
    pub armed: Option<bool>,
    #[serde(default)]
    pub current_waypoint: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DtoPosition {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DtoTelemetry {
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub fuel_level: Option<f64>,
    #[serde(default)]
    pub system_health: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
}

/// API status strings are upper case in practice; accept any case
fn parse_status(raw: &str) -> EntityStatus {
    match raw.to_ascii_uppercase().as_str() {
        "OFFLINE" => EntityStatus::Offline,
        "MAINTENANCE" | "WARNING" => EntityStatus::Warning,
        _ => EntityStatus::Online,
    }
}

impl EntityDto {
    /// Decode into an update for the store. Records without an id are skipped.
    pub fn into_update(self, route: &Route) -> Option<(String, EntityUpdate)> {
        let Some(id) = self.id.filter(|id| !id.is_empty()) else {
            warn!("Skipping fleet record without id");
            return None;
        };

        let position = self
            .position
            .map(|p| GeoPosition::new(p.latitude, p.longitude, p.altitude));
        let (route_index, route_progress) = match (&position, self.current_waypoint) {
            (Some(position), _) => {
                let placement = resolve(position, route);
                (placement.route_index, placement.route_progress)
            }
            (None, Some(waypoint)) => (waypoint.min(route.last_index()), 0.0),
            (None, None) => (0, 0.0),
        };

        let telemetry = self.telemetry.unwrap_or_default();
        let update = EntityUpdate {
            callsign: self.callsign,
            position,
            telemetry: TelemetryUpdate {
                battery_percent: telemetry.battery_level,
                fuel_percent: telemetry.fuel_level,
                speed: telemetry.speed,
                system_health: telemetry.system_health,
                heading: telemetry.heading,
            },
            route_index: Some(route_index),
            route_progress: Some(route_progress),
            status: Some(self.status.as_deref().map_or(EntityStatus::Online, parse_status)),
            armament: self.armed.map(|armed| Armament {
                armed,
                ..Armament::default()
            }),
        };
        Some((id, update))
    }
}
