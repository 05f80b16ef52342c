use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Failures the synchronization engine recovers from or reports.
///
/// None of these are fatal: the worst outcome is a permanent fallback to the
/// simulator, signalled through `ConnectionStatus::last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SyncError {
    /// Malformed inbound envelope; dropped
    Parse(String),
    /// Health probe did not answer within the timeout
    ProbeTimeout,
    /// Health probe answered with an error or could not connect
    ProbeFailure(String),
    /// Live connection closed with the given close code
    TransportClosed(u16),
    /// Reconnection gave up after this many attempts
    ReconnectExhausted(u32),
    /// Remote mission reset failed; the local reset was already applied
    ResetCallFailure(String),
}

impl SyncError {
    /// Probe timeouts and failures trigger the same fallback
    pub fn is_probe_failure(&self) -> bool {
        matches!(self, SyncError::ProbeTimeout | SyncError::ProbeFailure(_))
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Parse(reason) => write!(f, "malformed envelope: {}", reason),
            SyncError::ProbeTimeout => write!(f, "health probe timed out"),
            SyncError::ProbeFailure(reason) => write!(f, "health probe failed: {}", reason),
            SyncError::TransportClosed(code) => {
                write!(f, "live connection closed (code {})", code)
            }
            SyncError::ReconnectExhausted(attempts) => write!(
                f,
                "live feed unavailable after {} reconnect attempts, using simulation",
                attempts
            ),
            SyncError::ResetCallFailure(reason) => {
                write!(f, "remote mission reset failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for SyncError {}
