//! Outbound message routing from game logic to open sockets

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use super::protocol::ServerMsg;

/// Frames buffered per socket before new ones are dropped
const OUTBOX_CAPACITY: usize = 128;

/// Per-connection outboxes keyed by connection id.
///
/// Each socket's writer task drains its receiver; everything else sends by id.
pub struct ConnectionHub {
    outboxes: DashMap<String, mpsc::Sender<String>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            outboxes: DashMap::new(),
        }
    }

    /// Open an outbox for `conn_id`; the receiver feeds the socket writer
    pub fn register(&self, conn_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.outboxes.insert(conn_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, conn_id: &str) {
        self.outboxes.remove(conn_id);
    }

    pub fn is_connected(&self, conn_id: &str) -> bool {
        self.outboxes.contains_key(conn_id)
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Send one message; false if the socket is gone or backed up
    pub fn send(&self, conn_id: &str, msg: &ServerMsg) -> bool {
        match msg.encode() {
            Ok(text) => self.send_text(conn_id, text),
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "Failed to encode message");
                false
            }
        }
    }

    /// Encode once and send to every listed connection
    pub fn send_all(&self, conn_ids: &[String], msg: &ServerMsg) {
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode message");
                return;
            }
        };

        for conn_id in conn_ids {
            self.send_text(conn_id, text.clone());
        }
    }

    pub fn send_text(&self, conn_id: &str, text: String) -> bool {
        let Some(outbox) = self.outboxes.get(conn_id).map(|o| o.value().clone()) else {
            debug!(conn_id = %conn_id, "No open socket for connection");
            return false;
        };

        match outbox.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // Continue - don't disconnect for lag
                warn!(conn_id = %conn_id, "Client lagged, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.outboxes.remove(conn_id);
                false
            }
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_connection_id() {
        let hub = ConnectionHub::new();
        let mut a = hub.register("a");
        let mut b = hub.register("b");

        assert!(hub.send("a", &ServerMsg::Pong { t: 1, server_time: 2 }));
        hub.send_all(&["a".to_string(), "b".to_string()], &ServerMsg::error("X", "y"));

        assert!(a.recv().await.unwrap().contains("\"pong\""));
        assert!(a.recv().await.unwrap().contains("\"error\""));
        assert!(b.recv().await.unwrap().contains("\"error\""));
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_or_unknown_sockets_report_false() {
        let hub = ConnectionHub::new();
        assert!(!hub.send_text("ghost", "x".into()));

        let rx = hub.register("gone");
        drop(rx);
        assert!(!hub.send_text("gone", "x".into()));
        assert!(!hub.is_connected("gone"));

        let _rx = hub.register("c");
        assert_eq!(hub.connection_count(), 1);
        hub.unregister("c");
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn full_outbox_drops_frames() {
        let hub = ConnectionHub::new();
        let _rx = hub.register("slow");
        for _ in 0..OUTBOX_CAPACITY {
            assert!(hub.send_text("slow", "x".into()));
        }
        assert!(!hub.send_text("slow", "x".into()));
        assert!(hub.is_connected("slow"));
    }
}
