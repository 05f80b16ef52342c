//! Streaming transport client for the live feed.
//!
//! Owns one WebSocket connection per session, decodes inbound envelopes and
//! reports `Opened`, `Update` and `Closed` events to the supervisor. It never
//! reconnects on its own: retry policy belongs to the supervisor.

use futures_util::stream::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::entity::EntityUpdate;
use crate::protocol::{FeedMessage, decode_message};
use crate::route::Route;

/// Close code reported when the connection dropped without a close frame
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;
/// Close code reported for a close frame that carried no status
pub const NO_STATUS_CLOSE_CODE: u16 = 1005;
/// Time a closing connection gets to finish the close handshake
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Closed(u16),
    Update {
        entity_id: String,
        update: EntityUpdate,
    },
}

/// A transport event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: u64,
    pub event: TransportEvent,
}

/// Ownership of one open (or opening) live connection.
///
/// `close` lets the connection task send a close frame before it exits.
/// Dropping the handle without closing cancels and aborts the task outright.
pub struct TransportHandle {
    session: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(session: u64, cancel: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self {
            session,
            cancel,
            task,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Close the connection; no further events are produced for this session.
    /// The task is aborted if the close handshake outlasts `CLOSE_GRACE`.
    pub fn close(mut self) {
        debug!(session = self.session, "Closing live connection");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let session = self.session;
            let abort = task.abort_handle();
            tokio::spawn(async move {
                if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                    warn!(session, "Live connection did not close in time, aborting");
                    abort.abort();
                }
            });
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens live connections. A seam so the supervisor can be driven without a network.
pub trait TransportConnector: Send + Sync {
    fn open(&self, session: u64, events: flume::Sender<SessionEvent>) -> TransportHandle;
}

/// WebSocket connector for the live feed
pub struct WebSocketConnector {
    url: String,
    route: Route,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, route: Route) -> Self {
        Self {
            url: url.into(),
            route,
        }
    }
}

impl TransportConnector for WebSocketConnector {
    fn open(&self, session: u64, events: flume::Sender<SessionEvent>) -> TransportHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            self.url.clone(),
            self.route.clone(),
            session,
            events,
            cancel.clone(),
        ));
        TransportHandle::new(session, cancel, Some(task))
    }
}

/// Turn one text frame into a transport event. Malformed frames are logged and
/// dropped; unknown event types produce nothing.
pub fn text_frame_to_event(text: &str, route: &Route) -> Option<TransportEvent> {
    metrics::counter!("transport.messages.received_total").increment(1);
    match decode_message(text) {
        Ok(FeedMessage::PositionUpdated(report)) => {
            trace!(entity_id = %report.drone_id, "Position update received");
            Some(TransportEvent::Update {
                update: report.to_update(route),
                entity_id: report.drone_id,
            })
        }
        Ok(FeedMessage::Ignored { event_type }) => {
            debug!(event_type = %event_type, "Ignoring live feed event");
            metrics::counter!("transport.messages.ignored_total").increment(1);
            None
        }
        Ok(FeedMessage::Control { message_type }) => {
            debug!(message_type = %message_type, "Live feed control message");
            metrics::counter!("transport.messages.control_total").increment(1);
            None
        }
        Err(e) => {
            warn!(error = %e, "Dropping malformed live feed message");
            metrics::counter!("transport.messages.dropped_total").increment(1);
            None
        }
    }
}

#[tracing::instrument(skip(route, events, cancel), fields(url = %url))]
async fn run_connection(
    url: String,
    route: Route,
    session: u64,
    events: flume::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    // A closed channel means the supervisor is gone
    let emit = |event: TransportEvent| events.send(SessionEvent { session, event }).is_ok();

    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };
    let mut stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(error = %e, "Live feed connection failed");
            emit(TransportEvent::Closed(ABNORMAL_CLOSE_CODE));
            return;
        }
    };

    info!("Live feed connected");
    metrics::gauge!("transport.connected").set(1.0);
    if !emit(TransportEvent::Opened) {
        return;
    }

    let close_code = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Sending close frame");
                if stream.close(None).await.is_ok() {
                    // Read until the peer acknowledges the close
                    let _ = tokio::time::timeout(CLOSE_GRACE, async {
                        while let Some(Ok(_)) = stream.next().await {}
                    })
                    .await;
                }
                metrics::gauge!("transport.connected").set(0.0);
                return;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = text_frame_to_event(text.as_str(), &route)
                        && !emit(event)
                    {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or(NO_STATUS_CLOSE_CODE, |f| u16::from(f.code));
                }
                // Binary, ping and pong frames carry nothing for us
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Live feed read failed");
                    break ABNORMAL_CLOSE_CODE;
                }
                None => break ABNORMAL_CLOSE_CODE,
            }
        }
    };

    info!(code = close_code, "Live feed closed");
    metrics::gauge!("transport.connected").set(0.0);
    emit(TransportEvent::Closed(close_code));
}
