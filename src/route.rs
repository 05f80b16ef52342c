//! Convoy route and the waypoint resolver.
//!
//! The route is fixed for the lifetime of a session. `resolve` maps a position
//! reported by the live feed onto (route segment, progress) so that live and
//! simulated entities expose the same route fields.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::entity::{GeoPosition, clamp_unit};

/// Segments shorter than this (in degrees) are treated as zero-length
const DEGENERATE_SEGMENT_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub index: usize,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Waypoint {
    /// Position of the waypoint at the given altitude
    pub fn position(&self, altitude: f64) -> GeoPosition {
        GeoPosition::new(self.latitude, self.longitude, altitude)
    }
}

/// Where an entity sits along the route
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RoutePlacement {
    pub route_index: usize,
    pub route_progress: f64,
}

/// Ordered, immutable sequence of waypoints. Cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    waypoints: Arc<[Waypoint]>,
}

impl Route {
    /// Build a route from (name, latitude, longitude) triples in traversal order
    pub fn from_points<S: Into<String>>(points: impl IntoIterator<Item = (S, f64, f64)>) -> Self {
        let waypoints: Vec<Waypoint> = points
            .into_iter()
            .enumerate()
            .map(|(index, (name, latitude, longitude))| Waypoint {
                index,
                name: name.into(),
                latitude,
                longitude,
            })
            .collect();
        Self {
            waypoints: waypoints.into(),
        }
    }

    /// The 12-waypoint convoy route flown by the default fleet
    pub fn default_convoy() -> Self {
        Self::from_points([
            ("Base Alpha", 34.5553, 69.2075),
            ("Checkpoint Bravo", 34.6234, 69.1123),
            ("Outpost Charlie", 34.7012, 69.0456),
            ("Firebase Delta", 34.7891, 68.9234),
            ("Sector Echo", 34.8567, 68.8012),
            ("Point Foxtrot", 34.9234, 68.6789),
            ("Zone Golf", 34.9901, 68.5567),
            ("Camp Hotel", 35.0567, 68.4234),
            ("Station India", 35.1234, 68.3012),
            ("Forward Juliet", 35.1901, 68.1789),
            ("Base Kilo", 35.2567, 68.0567),
            ("Terminal Lima", 35.3234, 67.9234),
        ])
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Highest valid route index (0 for an empty route)
    pub fn last_index(&self) -> usize {
        self.waypoints.len().saturating_sub(1)
    }

    pub fn get(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    pub fn first(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    /// Interpolated position along segment [index, index + 1].
    /// Holds at the final waypoint once `index` is the last one.
    pub fn position_at(&self, index: usize, progress: f64, altitude: f64) -> Option<GeoPosition> {
        let current = self.get(index.min(self.last_index()))?;
        let here = current.position(altitude);
        match self.get(current.index + 1) {
            Some(next) => Some(here.interpolate(&next.position(altitude), progress)),
            None => Some(here),
        }
    }

    /// Bearing of the segment starting at `index`, if there is one
    pub fn segment_bearing(&self, index: usize) -> Option<f64> {
        let current = self.get(index)?;
        let next = self.get(index + 1)?;
        Some(current.position(0.0).bearing_to(&next.position(0.0)))
    }
}

impl Default for Route {
    fn default() -> Self {
        Self::default_convoy()
    }
}

/// Map a position onto the route.
///
/// Picks the nearest waypoint (Euclidean distance in coordinate space, ties go
/// to the lowest index). Progress along the following segment is the ratio of
/// the distance to that waypoint over the segment length, clamped to [0, 1].
/// This is a ratio heuristic rather than a perpendicular projection: it drives a
/// progress indicator only.
pub fn resolve(position: &GeoPosition, route: &Route) -> RoutePlacement {
    let Some((nearest, nearest_distance)) = route
        .waypoints()
        .iter()
        .map(|wp| (wp, position.planar_distance(&wp.position(0.0))))
        .fold(None::<(&Waypoint, f64)>, |best, (wp, distance)| match best {
            // strict comparison keeps the lowest index on ties
            Some((_, best_distance)) if distance >= best_distance => best,
            Some(_) if distance.is_nan() => best,
            _ => Some((wp, distance)),
        })
    else {
        return RoutePlacement::default();
    };

    let Some(next) = route.get(nearest.index + 1) else {
        return RoutePlacement {
            route_index: nearest.index,
            route_progress: 1.0,
        };
    };

    let segment_length = nearest.position(0.0).planar_distance(&next.position(0.0));
    let route_progress = if segment_length <= DEGENERATE_SEGMENT_EPSILON {
        0.0
    } else {
        clamp_unit(nearest_distance / segment_length)
    };

    RoutePlacement {
        route_index: nearest.index,
        route_progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_route() -> Route {
        Route::from_points([("A", 0.0, 0.0), ("B", 0.0, 10.0), ("C", 0.0, 20.0)])
    }

    #[test]
    fn test_default_convoy_route() {
        let route = Route::default_convoy();
        assert_eq!(route.len(), 12);
        assert_eq!(route.last_index(), 11);
        assert_eq!(route.first().map(|wp| wp.name.as_str()), Some("Base Alpha"));
        for (i, wp) in route.waypoints().iter().enumerate() {
            assert_eq!(wp.index, i);
        }
    }

    #[test]
    fn test_resolve_on_waypoint() {
        let route = straight_route();
        let placement = resolve(&GeoPosition::new(0.0, 10.0, 500.0), &route);
        assert_eq!(placement.route_index, 1);
        assert_eq!(placement.route_progress, 0.0);
    }

    #[test]
    fn test_resolve_partway_along_segment() {
        let route = straight_route();
        let placement = resolve(&GeoPosition::new(0.0, 3.0, 0.0), &route);
        assert_eq!(placement.route_index, 0);
        assert!((placement.route_progress - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_nearest_last_waypoint_is_complete() {
        let route = straight_route();
        let placement = resolve(&GeoPosition::new(1.0, 19.0, 0.0), &route);
        assert_eq!(placement.route_index, 2);
        assert_eq!(placement.route_progress, 1.0);
    }

    #[test]
    fn test_resolve_tie_prefers_lowest_index() {
        let route = straight_route();
        // Equidistant from A and B
        let placement = resolve(&GeoPosition::new(0.0, 5.0, 0.0), &route);
        assert_eq!(placement.route_index, 0);
        assert!((placement.route_progress - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_off_route_is_clamped() {
        let route = Route::from_points([("A", 0.0, 0.0), ("B", 0.0, 1.0), ("C", 50.0, 50.0)]);
        // Far from everything but closest to A; ratio would exceed 1
        let placement = resolve(&GeoPosition::new(-30.0, -30.0, 0.0), &route);
        assert_eq!(placement.route_index, 0);
        assert_eq!(placement.route_progress, 1.0);
    }

    #[test]
    fn test_resolve_empty_route() {
        let route = Route::from_points(Vec::<(String, f64, f64)>::new());
        assert_eq!(
            resolve(&GeoPosition::new(1.0, 2.0, 3.0), &route),
            RoutePlacement::default()
        );
    }

    #[test]
    fn test_resolve_degenerate_segment() {
        let route = Route::from_points([("A", 1.0, 1.0), ("A'", 1.0, 1.0), ("B", 2.0, 2.0)]);
        let placement = resolve(&GeoPosition::new(1.1, 1.0, 0.0), &route);
        assert_eq!(placement.route_index, 0);
        assert_eq!(placement.route_progress, 0.0);
    }

    #[test]
    fn test_resolve_stays_in_bounds_for_many_inputs() {
        let route = Route::default_convoy();
        for lat_step in -20..=20 {
            for lng_step in -20..=20 {
                let position =
                    GeoPosition::new(34.0 + lat_step as f64 * 0.1, 68.0 + lng_step as f64 * 0.1, 0.0);
                let placement = resolve(&position, &route);
                assert!(placement.route_index <= route.last_index());
                assert!((0.0..=1.0).contains(&placement.route_progress));
            }
        }
        let placement = resolve(&GeoPosition::new(f64::NAN, f64::NAN, 0.0), &route);
        assert!(placement.route_index <= route.last_index());
        assert_eq!(placement.route_progress, 0.0);
    }

    #[test]
    fn test_position_at_holds_at_final_waypoint() {
        let route = straight_route();
        let position = route.position_at(2, 0.7, 3000.0).unwrap();
        assert_eq!(position, GeoPosition::new(0.0, 20.0, 3000.0));

        let midway = route.position_at(0, 0.5, 3000.0).unwrap();
        assert_eq!(midway, GeoPosition::new(0.0, 5.0, 3000.0));
    }
}
