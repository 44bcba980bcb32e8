//! # cqlio-client
//!
//! Async single-connection client for the Cassandra native binary
//! protocol v1 (CQL 3).
//!
//! This crate provides:
//! - A full-duplex connection multiplexing up to 127 in-flight
//!   requests by stream id, with FIFO queueing beyond that
//! - STARTUP and password-authentication handshake handling
//! - Server event subscriptions (topology, status, schema changes)
//! - Prepared statements with bind-by-name and bind-by-position, and
//!   a client-side cache with eviction on handle drop

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod prepared;
mod streams;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, Credentials};
pub use error::ClientError;
pub use event::{ServerEvent, SCHEMA_CHANGE, STATUS_CHANGE, TOPOLOGY_CHANGE};
pub use prepared::PreparedStatement;

pub use cqlio_protocol::{Consistency, CqlResult, CqlType, CqlValue, Rows};
