//! convoy-sync - telemetry synchronization engine for convoy tracking
//!
//! Keeps an authoritative view of every tracked entity, sourced either from a
//! live WebSocket feed or from a kinematic simulator, with automatic failover
//! between the two.

pub mod config;
pub mod connection_status;
pub mod entity;
pub mod error;
pub mod log_format;
pub mod metrics;
pub mod protocol;
pub mod remote_api;
pub mod route;
pub mod simulator;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use config::SyncConfig;
pub use connection_status::{ConnectionMode, ConnectionStatus};
pub use entity::{Entity, EntityStatus, EntityUpdate, GeoPosition};
pub use error::SyncError;
pub use remote_api::{HttpRemoteApi, RemoteApi};
pub use route::{Route, RoutePlacement, Waypoint, resolve};
pub use simulator::{KinematicSimulator, SimulatorConfig};
pub use store::EntityStore;
pub use supervisor::{Supervisor, SupervisorCommand, SupervisorHandle, SupervisorSettings};
pub use transport::{TransportConnector, TransportEvent, WebSocketConnector};
