//! Connection supervisor: decides which source is authoritative and applies
//! its updates to the store.
//!
//! Everything runs on one task. `run` selects over operator commands,
//! transport events, the simulator ticker and the reconnect timer; only one of
//! the last two exists at a time. The store and mode live here and are
//! published to readers as snapshots.

use anyhow::{Result, anyhow};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::connection_status::{ConnectionMode, ConnectionStatus, ConnectionStatusPublisher};
use crate::entity::Entity;
use crate::error::SyncError;
use crate::remote_api::RemoteApi;
use crate::simulator::KinematicSimulator;
use crate::store::EntityStore;
use crate::transport::{SessionEvent, TransportConnector, TransportEvent, TransportHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    /// Upper bound for the health probe and the initial fleet read
    pub probe_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Consecutive closures tolerated before falling back to simulation
    pub max_reconnect_attempts: u32,
    pub tick_interval: Duration,
    /// Entities seeded when no remote fleet is available
    pub fleet_size: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(3),
            reconnect_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 10,
            tick_interval: Duration::from_millis(100),
            fleet_size: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorCommand {
    SwitchToLive,
    SwitchToSimulated,
    ResetMission,
    SetSpeedMultiplier(f64),
    Shutdown,
}

/// Cloneable front end for a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: flume::Sender<SupervisorCommand>,
    status: watch::Receiver<ConnectionStatus>,
    fleet: watch::Receiver<Vec<Entity>>,
}

impl SupervisorHandle {
    pub fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Supervisor is no longer running"))
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn fleet(&self) -> watch::Receiver<Vec<Entity>> {
        self.fleet.clone()
    }
}

pub struct Supervisor {
    settings: SupervisorSettings,
    api: Arc<dyn RemoteApi>,
    connector: Arc<dyn TransportConnector>,
    simulator: KinematicSimulator,
    store: EntityStore,
    mode: ConnectionMode,
    last_error: Option<SyncError>,
    start_simulated: bool,

    commands: flume::Receiver<SupervisorCommand>,
    events_tx: flume::Sender<SessionEvent>,
    events_rx: flume::Receiver<SessionEvent>,

    next_session: u64,
    transport: Option<TransportHandle>,
    reconnect: Option<Pin<Box<Sleep>>>,
    /// Consecutive closures since the link was last open
    reconnect_attempt: u32,
    ticker: Option<Interval>,

    status: ConnectionStatusPublisher,
    fleet_tx: watch::Sender<Vec<Entity>>,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        api: Arc<dyn RemoteApi>,
        connector: Arc<dyn TransportConnector>,
        simulator: KinematicSimulator,
    ) -> (Self, SupervisorHandle) {
        let (commands_tx, commands_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::unbounded();
        let (fleet_tx, fleet_rx) = watch::channel(Vec::new());
        let status = ConnectionStatusPublisher::new();
        let store = EntityStore::new(simulator.route().last_index());

        let handle = SupervisorHandle {
            commands: commands_tx,
            status: status.subscribe(),
            fleet: fleet_rx,
        };

        let supervisor = Self {
            settings,
            api,
            connector,
            simulator,
            store,
            mode: ConnectionMode::Connecting,
            last_error: None,
            start_simulated: false,
            commands: commands_rx,
            events_tx,
            events_rx,
            next_session: 0,
            transport: None,
            reconnect: None,
            reconnect_attempt: 0,
            ticker: None,
            status,
            fleet_tx,
        };
        (supervisor, handle)
    }

    /// Skip the startup probe and begin in simulation
    pub fn with_simulated_start(mut self, simulated: bool) -> Self {
        self.start_simulated = simulated;
        self
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn simulator_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// A connection is open or a reconnect is pending
    pub fn live_link_held(&self) -> bool {
        self.transport.is_some() || self.reconnect.is_some()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Session of the open connection, if any
    pub fn current_session(&self) -> Option<u64> {
        self.transport.as_ref().map(TransportHandle::session)
    }

    /// Run until `Shutdown` arrives or every handle is dropped
    pub async fn run(mut self) {
        self.startup().await;
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv_async() => match command {
                    Ok(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(event) = self.events_rx.recv_async() => self.handle_event(event),
                _ = next_tick(&mut self.ticker) => self.on_tick(),
                _ = reconnect_due(&mut self.reconnect) => self.on_reconnect_due(),
            }
            self.publish();
        }

        self.teardown();
        self.publish();
        info!("Supervisor stopped");
    }

    #[tracing::instrument(skip(self))]
    pub async fn startup(&mut self) {
        if self.start_simulated {
            info!("Starting in simulation as requested");
            self.seed_defaults();
            self.enter_simulated(None);
            return;
        }

        match probe(self.api.clone(), self.settings.probe_timeout).await {
            Ok(()) => {
                self.seed_from_remote().await;
                self.enter_live();
            }
            Err(e) => {
                warn!(error = %e, "Live backend unavailable, starting simulation");
                self.seed_defaults();
                self.enter_simulated(Some(e));
            }
        }
    }

    /// Apply one operator command. Returns false once the supervisor should stop.
    pub async fn handle_command(&mut self, command: SupervisorCommand) -> bool {
        debug!(?command, mode = %self.mode, "Handling command");
        match command {
            SupervisorCommand::SwitchToLive => self.switch_to_live().await,
            SupervisorCommand::SwitchToSimulated => self.switch_to_simulated(),
            SupervisorCommand::ResetMission => self.reset_mission(),
            SupervisorCommand::SetSpeedMultiplier(multiplier) => {
                self.simulator.set_speed_multiplier(multiplier)
            }
            SupervisorCommand::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        if self.current_session() != Some(event.session) {
            debug!(session = event.session, "Discarding event from stale session");
            metrics::counter!("transport.events.stale_total").increment(1);
            return;
        }

        match event.event {
            TransportEvent::Opened => {
                info!(session = event.session, "Live link open");
                self.reconnect_attempt = 0;
            }
            TransportEvent::Update { entity_id, update } => {
                if self.mode != ConnectionMode::Live {
                    return;
                }
                if self.store.apply_update(&entity_id, &update) {
                    info!(entity_id = %entity_id, "New entity from live feed");
                }
            }
            TransportEvent::Closed(code) => {
                let closure = SyncError::TransportClosed(code);
                warn!(session = event.session, error = %closure, "Live link closed");
                self.transport = None;
                self.schedule_reconnect(&closure);
            }
        }
    }

    /// Apply one simulator step to every entity
    pub fn on_tick(&mut self) {
        if self.mode != ConnectionMode::Simulated {
            return;
        }
        let updates = self.simulator.tick(&self.store.list());
        for (id, update) in &updates {
            self.store.apply_update(id, update);
        }
    }

    pub fn on_reconnect_due(&mut self) {
        self.reconnect = None;
        if self.mode != ConnectionMode::Live {
            return;
        }
        info!(attempt = self.reconnect_attempt, "Reconnecting to live feed");
        self.open_transport();
    }

    #[tracing::instrument(skip(self))]
    async fn switch_to_live(&mut self) {
        if self.mode == ConnectionMode::Live {
            debug!("Already live");
            return;
        }
        self.stop_simulator();
        self.mode = ConnectionMode::Connecting;
        self.publish();

        match probe(self.api.clone(), self.settings.probe_timeout).await {
            Ok(()) => {
                self.seed_from_remote().await;
                self.enter_live();
            }
            Err(e) => {
                warn!(error = %e, "Switch to live failed, staying in simulation");
                self.mode = ConnectionMode::Errored;
                self.last_error = Some(e);
                self.publish();
                self.enter_simulated(None);
            }
        }
    }

    fn switch_to_simulated(&mut self) {
        if self.mode == ConnectionMode::Simulated {
            debug!("Already simulated");
            return;
        }
        self.enter_simulated(None);
        let baseline = self.simulator.reset(&self.store.list());
        self.store.reset(baseline);
    }

    fn reset_mission(&mut self) {
        info!(mode = %self.mode, "Resetting mission");
        let baseline = self.simulator.reset(&self.store.list());
        self.store.reset(baseline);

        if self.mode == ConnectionMode::Live {
            let api = self.api.clone();
            // The local reset already stands; a failed remote call only gets logged
            tokio::spawn(async move {
                if let Err(e) = api.reset_mission().await {
                    warn!(error = %e, "Remote mission reset failed");
                    metrics::counter!("supervisor.reset_failures_total").increment(1);
                }
            });
        }
    }

    /// Replace the store with the remote fleet, or the default fleet if the
    /// read fails or comes back empty
    async fn seed_from_remote(&mut self) {
        let route = self.simulator.route().clone();
        let api = self.api.clone();
        let fetched =
            tokio::time::timeout(self.settings.probe_timeout, api.fetch_entities(&route)).await;

        let updates = match fetched {
            Ok(Ok(updates)) => updates,
            Ok(Err(e)) => {
                warn!(error = %format!("{:#}", e), "Initial fleet read failed");
                Vec::new()
            }
            Err(_) => {
                warn!("Initial fleet read timed out");
                Vec::new()
            }
        };

        if updates.is_empty() {
            self.seed_defaults();
            return;
        }
        self.store.reset(Vec::new());
        for (id, update) in &updates {
            self.store.apply_update(id, update);
        }
        info!(count = self.store.len(), "Seeded store from remote fleet");
    }

    fn seed_defaults(&mut self) {
        let fleet = self.simulator.seed_fleet(self.settings.fleet_size);
        self.store.reset(fleet);
        info!(count = self.store.len(), "Seeded store with default fleet");
    }

    fn enter_live(&mut self) {
        self.stop_simulator();
        self.mode = ConnectionMode::Live;
        self.last_error = None;
        self.reconnect_attempt = 0;
        self.open_transport();
    }

    /// Tear down the live link and start ticking. `error` replaces the last
    /// error when given.
    fn enter_simulated(&mut self, error: Option<SyncError>) {
        self.release_live_link();
        if let Some(error) = error {
            self.last_error = Some(error);
        }
        self.mode = ConnectionMode::Simulated;
        self.start_simulator();
    }

    fn open_transport(&mut self) {
        self.close_transport();
        self.next_session += 1;
        let session = self.next_session;
        debug!(session, "Opening live link");
        self.transport = Some(self.connector.open(session, self.events_tx.clone()));
    }

    fn close_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }

    fn release_live_link(&mut self) {
        self.close_transport();
        if self.reconnect.take().is_some() {
            debug!("Cancelled pending reconnect");
        }
        self.reconnect_attempt = 0;
    }

    fn schedule_reconnect(&mut self, closure: &SyncError) {
        if self.mode != ConnectionMode::Live {
            return;
        }
        self.reconnect_attempt += 1;
        metrics::counter!("supervisor.reconnect_attempts_total").increment(1);

        if self.reconnect_attempt >= self.settings.max_reconnect_attempts {
            let err = SyncError::ReconnectExhausted(self.reconnect_attempt);
            error!(cause = %closure, error = %err, "Giving up on live feed");
            self.enter_simulated(Some(err));
            return;
        }

        info!(
            attempt = self.reconnect_attempt,
            max_attempts = self.settings.max_reconnect_attempts,
            delay_ms = self.settings.reconnect_delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect = Some(Box::pin(tokio::time::sleep(self.settings.reconnect_delay)));
    }

    fn start_simulator(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let period = self.settings.tick_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        debug!(period_ms = period.as_millis() as u64, "Simulator started");
    }

    fn stop_simulator(&mut self) {
        if self.ticker.take().is_some() {
            debug!("Simulator stopped");
        }
    }

    /// Release every timer and the transport
    pub fn teardown(&mut self) {
        self.stop_simulator();
        self.release_live_link();
    }

    fn publish(&mut self) {
        let status = ConnectionStatus {
            mode: self.mode,
            last_error: self.last_error.clone(),
            reconnect_attempt: self.reconnect_attempt,
            simulator_ticking: self.simulator_ticking(),
            live_link_held: self.live_link_held(),
            timestamp: String::new(),
        };
        debug_assert!(
            !(status.simulator_ticking && status.live_link_held),
            "simulator and live link active together"
        );
        self.status.publish(status);
        self.fleet_tx.send_replace(self.store.list());
    }
}

/// Health probe bounded by `timeout` regardless of the client's own limits
async fn probe(api: Arc<dyn RemoteApi>, timeout: Duration) -> Result<(), SyncError> {
    match tokio::time::timeout(timeout, api.probe_health()).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::ProbeTimeout),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
