//! Server-pushed events and their fan-out.
//!
//! A server delivers EVENT frames on stream id -1 once the client has
//! subscribed with REGISTER. Decoded events are fanned out to a
//! broadcast sink registered for that event name when one exists, else
//! to the generic sink, else dropped.

use cqlio_protocol::{CqlBuffer, ProtocolError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Event name for cluster membership changes.
pub const TOPOLOGY_CHANGE: &str = "TOPOLOGY_CHANGE";
/// Event name for node up/down transitions.
pub const STATUS_CHANGE: &str = "STATUS_CHANGE";
/// Event name for schema alterations.
pub const SCHEMA_CHANGE: &str = "SCHEMA_CHANGE";

/// Capacity of each event broadcast channel; slow subscribers lag
/// rather than block the read loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    TopologyChange { change: String, node: SocketAddr },
    StatusChange { status: String, node: SocketAddr },
    SchemaChange {
        change: String,
        keyspace: String,
        table: String,
    },
}

impl ServerEvent {
    /// Decodes an EVENT body: the event name, then the name-specific
    /// payload.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = CqlBuffer::from_bytes(body);
        let name = buf.unpack_string()?;
        match name.as_str() {
            TOPOLOGY_CHANGE => Ok(ServerEvent::TopologyChange {
                change: buf.unpack_string()?,
                node: buf.unpack_inet()?,
            }),
            STATUS_CHANGE => Ok(ServerEvent::StatusChange {
                status: buf.unpack_string()?,
                node: buf.unpack_inet()?,
            }),
            SCHEMA_CHANGE => Ok(ServerEvent::SchemaChange {
                change: buf.unpack_string()?,
                keyspace: buf.unpack_string()?,
                table: buf.unpack_string()?,
            }),
            _ => Err(ProtocolError::UnknownEvent(name)),
        }
    }

    /// The wire name this event arrives under.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::TopologyChange { .. } => TOPOLOGY_CHANGE,
            ServerEvent::StatusChange { .. } => STATUS_CHANGE,
            ServerEvent::SchemaChange { .. } => SCHEMA_CHANGE,
        }
    }
}

/// Broadcast sinks for decoded events: one optional sender per event
/// name plus a generic catch-all.
pub(crate) struct EventSinks {
    named: Mutex<HashMap<&'static str, broadcast::Sender<ServerEvent>>>,
    generic: broadcast::Sender<ServerEvent>,
}

impl EventSinks {
    pub(crate) fn new() -> Self {
        let (generic, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            named: Mutex::new(HashMap::new()),
            generic,
        }
    }

    /// Subscribes to every event the server pushes.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.generic.subscribe()
    }

    /// Subscribes to one event name. Events with a named sink are not
    /// delivered to the generic sink.
    pub(crate) fn subscribe_named(&self, name: &'static str) -> broadcast::Receiver<ServerEvent> {
        let mut named = self.named.lock().unwrap_or_else(|e| e.into_inner());
        named
            .entry(name)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Delivers one decoded event: named sink first, then the generic
    /// sink, else dropped with a trace log.
    pub(crate) fn dispatch(&self, event: ServerEvent) {
        let named = self.named.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sink) = named.get(event.name()) {
            if sink.send(event).is_err() {
                tracing::trace!("named event sink has no subscribers, event dropped");
            }
            return;
        }
        drop(named);
        if self.generic.send(event).is_err() {
            tracing::trace!("no event subscribers, event dropped");
        }
    }
}
