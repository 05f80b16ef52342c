//! Connection status publisher for broadcasting supervisor state to readers.
//!
//! The supervisor is the only writer. Presentation code subscribes and gets
//! the latest status through a `watch` channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::info;

use crate::error::SyncError;

/// Process-wide connection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Connecting,
    Live,
    Simulated,
    Errored,
}

impl ConnectionMode {
    /// Numeric value reported on the `supervisor.mode` gauge
    pub fn gauge_value(self) -> f64 {
        match self {
            ConnectionMode::Connecting => 0.0,
            ConnectionMode::Live => 1.0,
            ConnectionMode::Simulated => 2.0,
            ConnectionMode::Errored => 3.0,
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionMode::Connecting => "connecting",
            ConnectionMode::Live => "live",
            ConnectionMode::Simulated => "simulated",
            ConnectionMode::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Default)]
pub struct ConnectionStatus {
    pub mode: ConnectionMode,
    /// Most recent surfaced error; cleared on a successful switch to live
    pub last_error: Option<SyncError>,
    /// Consecutive reconnect attempts made since the link was last open
    pub reconnect_attempt: u32,
    pub simulator_ticking: bool,
    /// A live connection is open or a reconnect is pending
    pub live_link_held: bool,
    pub timestamp: String,
}

/// Publisher for connection status updates
pub struct ConnectionStatusPublisher {
    sender: watch::Sender<ConnectionStatus>,
}

impl ConnectionStatusPublisher {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(ConnectionStatus {
            timestamp: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        });
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.sender.subscribe()
    }

    /// Publish `status` if anything but the timestamp changed. Returns true when
    /// subscribers were notified.
    pub fn publish(&self, mut status: ConnectionStatus) -> bool {
        self.sender.send_if_modified(|current| {
            status.timestamp.clone_from(&current.timestamp);
            if status == *current {
                return false;
            }
            if current.mode != status.mode {
                info!(
                    from = %current.mode,
                    to = %status.mode,
                    error = status.last_error.as_ref().map(|e| e.to_string()),
                    "Connection mode changed"
                );
                metrics::gauge!("supervisor.mode").set(status.mode.gauge_value());
            }
            status.timestamp = chrono::Utc::now().to_rfc3339();
            *current = status;
            true
        })
    }
}

impl Default for ConnectionStatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
