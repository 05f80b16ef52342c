//! Common test utilities for driving a supervisor without a network
//!
//! `FakeApi` stands in for the HTTP API and `ScriptedConnector` records every
//! session the supervisor opens, so tests can push transport events on behalf
//! of any session (including superseded ones).

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use convoy_sync::entity::{EntityUpdate, GeoPosition};
use convoy_sync::transport::{SessionEvent, TransportHandle};
use convoy_sync::{
    ConnectionStatus, Entity, KinematicSimulator, RemoteApi, Route, SimulatorConfig, Supervisor,
    SupervisorHandle, SupervisorSettings, SyncError, TransportConnector, TransportEvent,
};

pub struct FakeApi {
    pub healthy: AtomicBool,
    pub fleet: Vec<(String, EntityUpdate)>,
    pub reset_fails: bool,
    pub resets: AtomicUsize,
    /// Health checks never answer
    pub probe_hangs: bool,
    /// Fleet reads never answer
    pub fetch_hangs: bool,
}

impl FakeApi {
    pub fn new(healthy: bool, fleet: Vec<(String, EntityUpdate)>) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            fleet,
            reset_fails: false,
            resets: AtomicUsize::new(0),
            probe_hangs: false,
            fetch_hangs: false,
        }
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn probe_health(&self) -> Result<(), SyncError> {
        if self.probe_hangs {
            std::future::pending::<()>().await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::ProbeFailure("HTTP 503 Service Unavailable".into()))
        }
    }

    async fn fetch_entities(&self, _route: &Route) -> Result<Vec<(String, EntityUpdate)>> {
        if self.fetch_hangs {
            std::future::pending::<()>().await;
        }
        Ok(self.fleet.clone())
    }

    async fn reset_mission(&self) -> Result<(), SyncError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if self.reset_fails {
            Err(SyncError::ResetCallFailure("HTTP 500".into()))
        } else {
            Ok(())
        }
    }
}

pub struct OpenedSession {
    pub session: u64,
    pub events: flume::Sender<SessionEvent>,
    pub cancel: CancellationToken,
}

/// What a freshly opened session reports on its own
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OpenBehavior {
    #[default]
    Silent,
    Opens,
    FailsToConnect,
}

#[derive(Default)]
pub struct ScriptedConnector {
    pub behavior: OpenBehavior,
    pub sessions: Mutex<Vec<OpenedSession>>,
}

impl ScriptedConnector {
    pub fn new(behavior: OpenBehavior) -> Self {
        Self {
            behavior,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_cancelled(&self, session: u64) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.session == session)
            .map(|s| s.cancel.is_cancelled())
            .unwrap()
    }

    /// Push an event as if `session` produced it
    pub fn emit(&self, session: u64, event: TransportEvent) {
        let sessions = self.sessions.lock().unwrap();
        let opened = sessions.iter().find(|s| s.session == session).unwrap();
        opened
            .events
            .send(SessionEvent { session, event })
            .unwrap();
    }
}

impl TransportConnector for ScriptedConnector {
    fn open(&self, session: u64, events: flume::Sender<SessionEvent>) -> TransportHandle {
        let cancel = CancellationToken::new();
        match self.behavior {
            OpenBehavior::Silent => {}
            OpenBehavior::Opens => {
                let _ = events.send(SessionEvent {
                    session,
                    event: TransportEvent::Opened,
                });
            }
            OpenBehavior::FailsToConnect => {
                let _ = events.send(SessionEvent {
                    session,
                    event: TransportEvent::Closed(1006),
                });
            }
        }
        self.sessions.lock().unwrap().push(OpenedSession {
            session,
            events,
            cancel: cancel.clone(),
        });
        TransportHandle::new(session, cancel, None)
    }
}

pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        probe_timeout: Duration::from_millis(500),
        reconnect_delay: Duration::from_millis(20),
        max_reconnect_attempts: 10,
        tick_interval: Duration::from_millis(10),
        fleet_size: 12,
    }
}

pub fn remote_fleet(ids: &[&str]) -> Vec<(String, EntityUpdate)> {
    ids.iter()
        .enumerate()
        .map(|(n, id)| {
            (
                id.to_string(),
                EntityUpdate {
                    callsign: Some(format!("Remote {}", n + 1)),
                    position: Some(GeoPosition::new(34.5553, 69.2075, 3000.0)),
                    ..Default::default()
                },
            )
        })
        .collect()
}

/// Spawn a supervisor over the given fakes
pub fn spawn_supervisor(
    settings: SupervisorSettings,
    api: Arc<FakeApi>,
    connector: Arc<ScriptedConnector>,
) -> (SupervisorHandle, tokio::task::JoinHandle<()>) {
    let simulator =
        KinematicSimulator::with_seed(Route::default_convoy(), SimulatorConfig::default(), 42);
    let (supervisor, handle) = Supervisor::new(settings, api, connector, simulator);
    let task = tokio::spawn(supervisor.run());
    (handle, task)
}

pub async fn wait_for_status(
    handle: &SupervisorHandle,
    mut predicate: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut status = handle.status();
    let result = tokio::time::timeout(Duration::from_secs(30), status.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for status")
        .expect("supervisor stopped")
        .clone();
    result
}

pub async fn wait_for_fleet(
    handle: &SupervisorHandle,
    mut predicate: impl FnMut(&[Entity]) -> bool,
) -> Vec<Entity> {
    let mut fleet = handle.fleet();
    let result = tokio::time::timeout(Duration::from_secs(30), fleet.wait_for(|f| predicate(f)))
        .await
        .expect("timed out waiting for fleet")
        .expect("supervisor stopped")
        .clone();
    result
}
