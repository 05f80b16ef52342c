//! Entity records tracked by the synchronization engine and the partial
//! updates that both update sources (live feed and simulator) produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_BATTERY_PERCENT: f64 = 100.0;
pub const DEFAULT_FUEL_PERCENT: f64 = 100.0;
pub const DEFAULT_SYSTEM_HEALTH: f64 = 95.0;

/// Battery or fuel below this level puts an online entity into warning
pub const CRITICAL_RESOURCE_PERCENT: f64 = 15.0;

/// Geographic position; altitude in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Euclidean distance in coordinate space (degrees), ignoring altitude
    pub fn planar_distance(&self, other: &GeoPosition) -> f64 {
        let d_lat = self.latitude - other.latitude;
        let d_lng = self.longitude - other.longitude;
        (d_lat * d_lat + d_lng * d_lng).sqrt()
    }

    /// Linear interpolation of latitude/longitude; altitude is kept from `self`
    /// fraction: 0.0 = self, 1.0 = other
    pub fn interpolate(&self, other: &GeoPosition, fraction: f64) -> GeoPosition {
        let fraction = fraction.clamp(0.0, 1.0);
        GeoPosition::new(
            self.latitude + (other.latitude - self.latitude) * fraction,
            self.longitude + (other.longitude - self.longitude) * fraction,
            self.altitude,
        )
    }

    /// Initial great-circle bearing to `other` in degrees (0-360)
    pub fn bearing_to(&self, other: &GeoPosition) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lng = (other.longitude - self.longitude).to_radians();

        let y = delta_lng.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

        y.atan2(x).to_degrees().rem_euclid(360.0)
    }
}

/// Telemetry readings; percentages are in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub battery_percent: f64,
    pub fuel_percent: f64,
    /// Ground speed in km/h
    pub speed: f64,
    pub system_health: f64,
    /// Heading in degrees (0-360)
    pub heading: f64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            battery_percent: DEFAULT_BATTERY_PERCENT,
            fuel_percent: DEFAULT_FUEL_PERCENT,
            speed: 0.0,
            system_health: DEFAULT_SYSTEM_HEALTH,
            heading: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Online,
    Offline,
    Warning,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::Online => write!(f, "online"),
            EntityStatus::Offline => write!(f, "offline"),
            EntityStatus::Warning => write!(f, "warning"),
        }
    }
}

/// Weapons loadout carried by an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Armament {
    pub hellfire_missiles: u8,
    pub guided_bombs: u8,
    pub armed: bool,
}

impl Default for Armament {
    fn default() -> Self {
        Self {
            hellfire_missiles: 4,
            guided_bombs: 2,
            armed: false,
        }
    }
}

/// A tracked convoy member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub callsign: String,
    pub position: GeoPosition,
    pub telemetry: Telemetry,
    /// Index of the current (most recently passed) waypoint
    pub route_index: usize,
    /// Fraction of the segment [route_index, route_index + 1] covered
    pub route_progress: f64,
    pub status: EntityStatus,
    pub armament: Armament,
    pub last_update: DateTime<Utc>,
}

impl Entity {
    /// Create an entity with every field at its documented default
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            callsign: id.clone(),
            id,
            position: GeoPosition::default(),
            telemetry: Telemetry::default(),
            route_index: 0,
            route_progress: 0.0,
            status: EntityStatus::default(),
            armament: Armament::default(),
            last_update: Utc::now(),
        }
    }

    pub fn is_low_on_resources(&self) -> bool {
        low_on_resources(self.telemetry.battery_percent, self.telemetry.fuel_percent)
    }

    /// Merge a partial update into this record (last write wins).
    ///
    /// Fields absent from the update keep their value. Route and telemetry
    /// values are clamped so the record invariants hold whatever the source sent.
    pub fn merge(&mut self, update: &EntityUpdate, last_route_index: usize) {
        if let Some(callsign) = &update.callsign {
            self.callsign = callsign.clone();
        }
        if let Some(position) = update.position {
            self.position = position;
        }
        update.telemetry.apply_to(&mut self.telemetry);
        if let Some(route_index) = update.route_index {
            self.route_index = route_index;
        }
        if let Some(route_progress) = update.route_progress {
            self.route_progress = route_progress;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(armament) = update.armament {
            self.armament = armament;
        }

        self.route_index = self.route_index.min(last_route_index);
        self.route_progress = clamp_unit(self.route_progress);
        self.last_update = Utc::now();
    }
}

/// Clamp to [0, 1]; non-finite values collapse to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Either resource below the critical threshold
pub fn low_on_resources(battery_percent: f64, fuel_percent: f64) -> bool {
    battery_percent < CRITICAL_RESOURCE_PERCENT || fuel_percent < CRITICAL_RESOURCE_PERCENT
}

/// Per-field telemetry changes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub battery_percent: Option<f64>,
    pub fuel_percent: Option<f64>,
    pub speed: Option<f64>,
    pub system_health: Option<f64>,
    pub heading: Option<f64>,
}

impl TelemetryUpdate {
    fn apply_to(&self, telemetry: &mut Telemetry) {
        if let Some(battery) = self.battery_percent {
            telemetry.battery_percent = clamp_percent(battery);
        }
        if let Some(fuel) = self.fuel_percent {
            telemetry.fuel_percent = clamp_percent(fuel);
        }
        if let Some(speed) = self.speed {
            telemetry.speed = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
        }
        if let Some(health) = self.system_health {
            telemetry.system_health = clamp_percent(health);
        }
        if let Some(heading) = self.heading.filter(|h| h.is_finite()) {
            telemetry.heading = heading.rem_euclid(360.0);
        }
    }
}

/// Partial entity state produced by an update source.
///
/// The supervisor is the only component that applies these to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityUpdate {
    pub callsign: Option<String>,
    pub position: Option<GeoPosition>,
    pub telemetry: TelemetryUpdate,
    pub route_index: Option<usize>,
    pub route_progress: Option<f64>,
    pub status: Option<EntityStatus>,
    pub armament: Option<Armament>,
}
