//! Kinematic simulator used when no live feed is authoritative.
//!
//! The simulator never touches the store. `tick` reads the current records and
//! returns the update intents for the supervisor to apply.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{
    Entity, EntityStatus, EntityUpdate, Telemetry, TelemetryUpdate, low_on_resources,
};
use crate::route::Route;

const CRUISE_ALTITUDE_M: f64 = 3000.0;
const ALTITUDE_STAGGER_M: f64 = 100.0;
const CRUISE_SPEED_KMH: f64 = 350.0;

/// Fresh entities start with health sampled from this range
const FRESH_HEALTH_MIN: f64 = 95.0;
const FRESH_HEALTH_MAX: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Route progress added per tick at speed multiplier 1.0
    #[serde(default = "default_step_rate")]
    pub step_rate: f64,
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f64,
    /// Battery percent drained per tick at speed multiplier 1.0
    #[serde(default = "default_battery_drain_rate")]
    pub battery_drain_rate: f64,
    #[serde(default = "default_fuel_drain_rate")]
    pub fuel_drain_rate: f64,
    /// System health never degrades below this
    #[serde(default = "default_health_floor")]
    pub health_floor: f64,
    /// Upper bound of the random health loss per tick
    #[serde(default = "default_health_jitter")]
    pub health_jitter: f64,
}

fn default_step_rate() -> f64 {
    0.01
}

fn default_speed_multiplier() -> f64 {
    1.0
}

fn default_battery_drain_rate() -> f64 {
    0.02
}

fn default_fuel_drain_rate() -> f64 {
    0.03
}

fn default_health_floor() -> f64 {
    70.0
}

fn default_health_jitter() -> f64 {
    0.05
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            step_rate: default_step_rate(),
            speed_multiplier: default_speed_multiplier(),
            battery_drain_rate: default_battery_drain_rate(),
            fuel_drain_rate: default_fuel_drain_rate(),
            health_floor: default_health_floor(),
            health_jitter: default_health_jitter(),
        }
    }
}

fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() {
        multiplier.max(0.0)
    } else {
        0.0
    }
}

pub struct KinematicSimulator {
    route: Route,
    config: SimulatorConfig,
    rng: StdRng,
}

impl KinematicSimulator {
    pub fn new(route: Route, config: SimulatorConfig) -> Self {
        Self::with_seed(route, config, rand::random::<u64>())
    }

    /// Simulator with a fixed RNG seed, for reproducible runs
    pub fn with_seed(route: Route, mut config: SimulatorConfig, seed: u64) -> Self {
        config.speed_multiplier = sanitize_multiplier(config.speed_multiplier);
        Self {
            route,
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Negative or non-finite multipliers are treated as 0 (fleet holds position)
    pub fn set_speed_multiplier(&mut self, multiplier: f64) {
        self.config.speed_multiplier = sanitize_multiplier(multiplier);
        debug!(
            speed_multiplier = self.config.speed_multiplier,
            "Simulator speed changed"
        );
    }

    /// Default fleet: REAPER-01..REAPER-NN parked at the first waypoint
    pub fn seed_fleet(&mut self, count: usize) -> Vec<Entity> {
        (1..=count)
            .map(|n| {
                let mut entity = Entity::new(format!("REAPER-{:02}", n));
                entity.callsign = format!("Reaper {}", n);
                entity.position.altitude = CRUISE_ALTITUDE_M + n as f64 * ALTITUDE_STAGGER_M;
                entity.telemetry.speed = CRUISE_SPEED_KMH + (0.8 + n as f64 * 0.02) * 50.0;
                self.park_at_start(&mut entity);
                entity
            })
            .collect()
    }

    /// Baseline for a mission reset: every entity back at the first waypoint with
    /// full resources. Status, callsign, loadout, altitude and speed are kept.
    pub fn reset(&mut self, entities: &[Entity]) -> Vec<Entity> {
        entities
            .iter()
            .map(|entity| {
                let mut entity = entity.clone();
                self.park_at_start(&mut entity);
                entity
            })
            .collect()
    }

    fn park_at_start(&mut self, entity: &mut Entity) {
        entity.route_index = 0;
        entity.route_progress = 0.0;
        if let Some(start) = self.route.position_at(0, 0.0, entity.position.altitude) {
            entity.position = start;
        }
        entity.telemetry = Telemetry {
            battery_percent: 100.0,
            fuel_percent: 100.0,
            speed: entity.telemetry.speed,
            system_health: self.rng.random_range(FRESH_HEALTH_MIN..=FRESH_HEALTH_MAX),
            heading: self.route.segment_bearing(0).unwrap_or(entity.telemetry.heading),
        };
    }

    /// Advance every non-offline entity by one tick
    pub fn tick(&mut self, entities: &[Entity]) -> Vec<(String, EntityUpdate)> {
        metrics::counter!("simulator.ticks_total").increment(1);
        entities
            .iter()
            .filter(|entity| entity.status != EntityStatus::Offline)
            .map(|entity| (entity.id.clone(), self.advance(entity)))
            .collect()
    }

    fn advance(&mut self, entity: &Entity) -> EntityUpdate {
        let multiplier = self.config.speed_multiplier;
        let last_index = self.route.last_index();

        let mut route_index = entity.route_index.min(last_index);
        let mut route_progress = if route_index == last_index {
            // arrived
            0.0
        } else {
            entity.route_progress + self.config.step_rate * multiplier
        };
        if route_progress >= 1.0 {
            route_progress = 0.0;
            route_index = (route_index + 1).min(last_index);
        }
        let route_progress = crate::entity::clamp_unit(route_progress);

        let position = self
            .route
            .position_at(route_index, route_progress, entity.position.altitude)
            .unwrap_or(entity.position);

        let battery_percent =
            (entity.telemetry.battery_percent - self.config.battery_drain_rate * multiplier)
                .max(0.0)
                .min(entity.telemetry.battery_percent);
        let fuel_percent = (entity.telemetry.fuel_percent - self.config.fuel_drain_rate * multiplier)
            .max(0.0)
            .min(entity.telemetry.fuel_percent);

        let jitter = if self.config.health_jitter > 0.0 {
            self.rng.random_range(0.0..=self.config.health_jitter)
        } else {
            0.0
        };
        let current_health = entity.telemetry.system_health;
        let system_health = (current_health - jitter)
            .max(self.config.health_floor)
            .min(current_health);

        let status = if entity.status == EntityStatus::Online
            && low_on_resources(battery_percent, fuel_percent)
        {
            debug!(entity_id = %entity.id, battery_percent, fuel_percent, "Entity low on resources");
            Some(EntityStatus::Warning)
        } else {
            None
        };

        EntityUpdate {
            position: Some(position),
            telemetry: TelemetryUpdate {
                battery_percent: Some(battery_percent),
                fuel_percent: Some(fuel_percent),
                system_health: Some(system_health),
                heading: self.route.segment_bearing(route_index),
                speed: None,
            },
            route_index: Some(route_index),
            route_progress: Some(route_progress),
            status,
            ..Default::default()
        }
    }
}
