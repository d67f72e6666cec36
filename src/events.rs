//! Connection telemetry events.
//!
//! Every lifecycle edge and message operation emits a plain-data
//! [`ConnectionEvent`] to an optional [`EventSink`]. Events carry the
//! connection id plus whatever the operation knows (durations, byte
//! counts, request ids, error text); there is no event class hierarchy
//! and no sink means no work.

use std::time::Duration;

use crate::connection::ConnectionId;
use crate::transport::Endpoint;

/// A telemetry event emitted by a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Open started.
    Opening {
        connection_id: ConnectionId,
        endpoint: Endpoint,
    },
    /// Open finished; the handshake succeeded.
    Opened {
        connection_id: ConnectionId,
        endpoint: Endpoint,
        duration: Duration,
    },
    /// Open failed at any stage.
    OpeningFailed {
        connection_id: ConnectionId,
        endpoint: Endpoint,
        error: String,
    },
    /// Close started.
    Closing { connection_id: ConnectionId },
    /// Close finished.
    Closed {
        connection_id: ConnectionId,
        duration: Duration,
    },
    /// The connection transitioned to the failed state.
    Failed {
        connection_id: ConnectionId,
        error: String,
    },
    /// Encoded messages are about to be written.
    SendingMessages {
        connection_id: ConnectionId,
        request_ids: Vec<i32>,
    },
    /// Messages reached the wire.
    SentMessages {
        connection_id: ConnectionId,
        request_ids: Vec<i32>,
        bytes: usize,
        duration: Duration,
    },
    /// Writing the encoded messages failed.
    SendingMessagesFailed {
        connection_id: ConnectionId,
        request_ids: Vec<i32>,
        error: String,
    },
    /// A caller started waiting for a reply.
    ReceivingMessage {
        connection_id: ConnectionId,
        response_to: i32,
    },
    /// A reply was delivered and decoded.
    ReceivedMessage {
        connection_id: ConnectionId,
        response_to: i32,
        bytes: usize,
        duration: Duration,
    },
    /// Waiting for or decoding a reply failed.
    ReceivingMessageFailed {
        connection_id: ConnectionId,
        response_to: i32,
        error: String,
    },
}

impl ConnectionEvent {
    /// The id of the connection the event belongs to.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Opening { connection_id, .. }
            | ConnectionEvent::Opened { connection_id, .. }
            | ConnectionEvent::OpeningFailed { connection_id, .. }
            | ConnectionEvent::Closing { connection_id }
            | ConnectionEvent::Closed { connection_id, .. }
            | ConnectionEvent::Failed { connection_id, .. }
            | ConnectionEvent::SendingMessages { connection_id, .. }
            | ConnectionEvent::SentMessages { connection_id, .. }
            | ConnectionEvent::SendingMessagesFailed { connection_id, .. }
            | ConnectionEvent::ReceivingMessage { connection_id, .. }
            | ConnectionEvent::ReceivedMessage { connection_id, .. }
            | ConnectionEvent::ReceivingMessageFailed { connection_id, .. } => *connection_id,
        }
    }
}

/// Receives connection events.
///
/// Implementations must be cheap and non-blocking; events are emitted
/// inline on the calling task.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &ConnectionEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventSink for Recorder {
        fn on_event(&self, event: &ConnectionEvent) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{event:?}"));
        }
    }

    #[test]
    fn test_connection_id_accessor() {
        let id = ConnectionId::new(3);
        let event = ConnectionEvent::Closing { connection_id: id };
        assert_eq!(event.connection_id(), id);
    }

    #[test]
    fn test_sink_receives_events() {
        let recorder = Recorder {
            seen: Mutex::new(Vec::new()),
        };

        recorder.on_event(&ConnectionEvent::Failed {
            connection_id: ConnectionId::new(1),
            error: "boom".into(),
        });

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("boom"));
    }
}
