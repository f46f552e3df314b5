//! Frame bodies exchanged on the connection.

use serde::{Deserialize, Serialize};

/// An outbound method call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Correlation id, unique for the lifetime of a connection.
    pub id: u32,
    pub method_name: String,
    /// The serialized parameter message.
    pub parameters: Vec<u8>,
    /// Number of descriptors sent alongside this frame.
    pub fds_on_side_channel: u32,
}

/// An inbound frame: an optional response plus any server-pushed events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResult {
    /// The invocation this result answers, if any.
    pub id: Option<u32>,
    /// The serialized response message.
    pub response: Option<Vec<u8>>,
    /// Serialized [`EventSequence`](crate::EventSequence)s, in delivery order.
    pub events: Vec<Vec<u8>>,
}

impl RpcResult {
    /// A result answering `id` with `response`.
    pub fn response(id: u32, response: Vec<u8>) -> Self {
        Self {
            id: Some(id),
            response: Some(response),
            events: Vec::new(),
        }
    }

    /// An event-only result (no call is answered).
    pub fn events(events: Vec<Vec<u8>>) -> Self {
        Self {
            id: None,
            response: None,
            events,
        }
    }

    /// Append an event sequence.
    pub fn with_event(mut self, sequence: Vec<u8>) -> Self {
        self.events.push(sequence);
        self
    }
}
