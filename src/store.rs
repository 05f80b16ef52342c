//! Entity state store: the canonical id → entity mapping.
//!
//! The store is owned by the supervisor, which is its only writer. Readers
//! get cloned snapshots from `list()` and never hold references into it.

use std::collections::HashMap;

use crate::entity::{Entity, EntityUpdate};

#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    /// Entity ids in seed order; ids first seen through an update are appended
    order: Vec<String>,
    records: HashMap<String, Entity>,
    /// Highest valid route index, used to clamp merged updates
    last_route_index: usize,
}

impl EntityStore {
    pub fn new(last_route_index: usize) -> Self {
        Self {
            order: Vec::new(),
            records: HashMap::new(),
            last_route_index,
        }
    }

    /// Merge `update` into the record for `id`, creating it with defaults if absent.
    /// Returns true when a new record was created.
    pub fn apply_update(&mut self, id: &str, update: &EntityUpdate) -> bool {
        let created = !self.records.contains_key(id);
        if created {
            self.order.push(id.to_string());
        }
        let last_route_index = self.last_route_index;
        self.records
            .entry(id.to_string())
            .or_insert_with(|| Entity::new(id))
            .merge(update, last_route_index);

        metrics::gauge!("store.entities").set(self.records.len() as f64);
        created
    }

    /// Replace every record with `baseline` in one step
    pub fn reset(&mut self, baseline: Vec<Entity>) {
        let mut order = Vec::with_capacity(baseline.len());
        let mut records = HashMap::with_capacity(baseline.len());
        for mut entity in baseline {
            entity.route_index = entity.route_index.min(self.last_route_index);
            entity.route_progress = crate::entity::clamp_unit(entity.route_progress);
            if !records.contains_key(&entity.id) {
                order.push(entity.id.clone());
            }
            records.insert(entity.id.clone(), entity);
        }
        self.order = order;
        self.records = records;

        metrics::gauge!("store.entities").set(self.records.len() as f64);
    }

    /// Snapshot of all records in seed order
    pub fn list(&self) -> Vec<Entity> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityStatus, GeoPosition, TelemetryUpdate};

    fn seeded(ids: &[&str]) -> EntityStore {
        let mut store = EntityStore::new(11);
        store.reset(ids.iter().map(|id| Entity::new(*id)).collect());
        store
    }

    #[test]
    fn test_apply_update_creates_with_defaults() {
        let mut store = EntityStore::new(11);
        let update = EntityUpdate {
            position: Some(GeoPosition::new(34.6, 69.1, 3200.0)),
            ..Default::default()
        };
        assert!(store.apply_update("REAPER-13", &update));

        let entity = store.get("REAPER-13").unwrap();
        assert_eq!(entity.callsign, "REAPER-13");
        assert_eq!(entity.telemetry.battery_percent, 100.0);
        assert_eq!(entity.telemetry.fuel_percent, 100.0);
        assert_eq!(entity.telemetry.system_health, 95.0);
        assert_eq!(entity.status, EntityStatus::Online);
        assert_eq!(entity.position.altitude, 3200.0);
    }

    #[test]
    fn test_partial_updates_retain_prior_fields() {
        let mut store = seeded(&["REAPER-01"]);
        store.apply_update(
            "REAPER-01",
            &EntityUpdate {
                callsign: Some("Alpha Lead".to_string()),
                position: Some(GeoPosition::new(34.7, 69.0, 3100.0)),
                route_index: Some(2),
                route_progress: Some(0.4),
                ..Default::default()
            },
        );
        store.apply_update(
            "REAPER-01",
            &EntityUpdate {
                telemetry: TelemetryUpdate {
                    fuel_percent: Some(61.0),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let entity = store.get("REAPER-01").unwrap();
        assert_eq!(entity.callsign, "Alpha Lead");
        assert_eq!(entity.position, GeoPosition::new(34.7, 69.0, 3100.0));
        assert_eq!(entity.route_index, 2);
        assert_eq!(entity.route_progress, 0.4);
        assert_eq!(entity.telemetry.fuel_percent, 61.0);
        assert_eq!(entity.telemetry.battery_percent, 100.0);
    }

    #[test]
    fn test_list_preserves_seed_order_and_appends_new_ids() {
        let mut store = seeded(&["C", "A", "B"]);
        store.apply_update("A", &EntityUpdate::default());
        store.apply_update("Z", &EntityUpdate::default());

        let ids: Vec<String> = store.list().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["C", "A", "B", "Z"]);
    }

    #[test]
    fn test_reset_replaces_all_records() {
        let mut store = seeded(&["A", "B"]);
        store.apply_update("C", &EntityUpdate::default());
        assert_eq!(store.len(), 3);

        store.reset(vec![Entity::new("X")]);
        assert_eq!(store.len(), 1);
        assert!(store.get("A").is_none());
        assert_eq!(store.list()[0].id, "X");
    }

    #[test]
    fn test_reset_with_duplicate_ids_keeps_first_position() {
        let mut store = EntityStore::new(11);
        let mut later = Entity::new("A");
        later.callsign = "second".to_string();
        store.reset(vec![Entity::new("A"), Entity::new("B"), later]);

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "A");
        assert_eq!(listed[0].callsign, "second");
    }

    #[test]
    fn test_snapshot_is_detached_from_store() {
        let mut store = seeded(&["A"]);
        let snapshot = store.list();
        store.apply_update(
            "A",
            &EntityUpdate {
                status: Some(EntityStatus::Offline),
                ..Default::default()
            },
        );
        assert_eq!(snapshot[0].status, EntityStatus::Online);
        assert_eq!(store.get("A").unwrap().status, EntityStatus::Offline);
    }
}
