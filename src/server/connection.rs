//! One client connection as the server sees it

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::LatencyTracker;

pub type ConnectionId = u64;

#[derive(Debug)]
struct ConnectionState {
    client_id: Option<u64>,
    last_contact: f64,
    latency: LatencyTracker,
}

/// Handle to a connected client.
///
/// Outbound bodies go onto a channel drained by the connection's writer task,
/// so queueing never blocks and never touches the socket.
#[derive(Debug)]
pub struct ServerConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    state: Mutex<ConnectionState>,
}

impl ServerConnection {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<String>, now: f64) -> Self {
        Self {
            id,
            outbound,
            state: Mutex::new(ConnectionState {
                client_id: None,
                last_contact: now,
                latency: LatencyTracker::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message body for sending. Dropped if the writer has gone.
    pub fn queue_message(&self, body: impl Into<String>) {
        let body = body.into();
        if self.outbound.send(body).is_err() {
            debug!(connection = self.id, "Writer gone, dropping message");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Sender id from the client's `Hello()`
    pub fn client_id(&self) -> Option<u64> {
        self.state.lock().client_id
    }

    pub fn set_client_id(&self, client_id: u64) {
        self.state.lock().client_id = Some(client_id);
    }

    /// Server time of the last message we had from this client
    pub fn last_contact(&self) -> f64 {
        self.state.lock().last_contact
    }

    pub fn touch(&self, time: f64) {
        self.state.lock().last_contact = time;
    }

    pub fn is_out_of_contact(&self, now: f64, window: f64) -> bool {
        self.last_contact() < now - window
    }

    pub fn latency(&self) -> LatencyTracker {
        self.state.lock().latency
    }

    pub fn record_pong(&self, now: f64, start_time: f64, peer_time: f64) {
        self.state
            .lock()
            .latency
            .record_pong(now, start_time, peer_time);
    }

    pub fn client_time_to_server(&self, client_time: f64) -> f64 {
        self.state.lock().latency.client_time_to_server(client_time)
    }

    pub fn disconnected(&self) {
        self.state.lock().last_contact = -1.0;
    }
}
