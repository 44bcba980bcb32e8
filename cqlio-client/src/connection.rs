//! Connection management.
//!
//! One `Connection` owns one TCP stream and multiplexes up to 127
//! concurrent requests over it, correlating responses by stream id.
//! Requests beyond that wait in a FIFO queue and go out as responses
//! free their ids. Server events arrive on stream -1 and fan out to
//! subscribers; frames on stream 0 are connection-level server errors.
//!
//! The handshake (STARTUP, optional CREDENTIALS, optional USE) reads
//! from the socket directly, before the read loop exists. Everything
//! after `connect` goes through [`Connection::request`] and is resolved
//! by [`Connection::read_loop`], which the caller (normally
//! [`crate::Client`]) drives in a background task.

use crate::error::ClientError;
use crate::event::{EventSinks, ServerEvent};
use crate::streams::{StreamTable, Submission};
use bytes::{Bytes, BytesMut};
use cqlio_protocol::{
    quote_identifier, Consistency, CqlBuffer, CqlResult, Frame, Opcode, ProtocolError,
    CQL_VERSION, CQL_VERSION_KEY, EVENT_STREAM, UNSOLICITED_STREAM,
};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// The only authenticator class the CREDENTIALS flow recognises.
pub const PASSWORD_AUTHENTICATOR: &str = "org.apache.cassandra.auth.PasswordAuthenticator";

/// Stream id used for the handshake exchanges, which run before any
/// other request can exist.
const HANDSHAKE_STREAM: i8 = 1;

/// Username and password for the CREDENTIALS message.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Credentials offered when the server demands authentication.
    pub credentials: Option<Credentials>,
    /// Keyspace selected with USE before `connect` resolves.
    pub keyspace: Option<String>,
    /// Consistency level for requests that do not specify one.
    pub consistency: Consistency,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            credentials: None,
            keyspace: None,
            consistency: Consistency::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }
}

/// A single multiplexed connection to one Cassandra node.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream (for sending requests).
    writer: Mutex<Option<WriteHalf<TcpStream>>>,
    /// Read half of the stream (for receiving responses).
    reader: Mutex<Option<ReadHalf<TcpStream>>>,
    /// Reassembly buffer for partially received frames.
    inbound: Mutex<BytesMut>,
    /// Stream-id slots and the FIFO of requests waiting for one.
    streams: Mutex<StreamTable>,
    /// Is the connection established?
    connected: AtomicBool,
    /// Fan-out sinks for server-pushed events.
    sinks: EventSinks,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            inbound: Mutex::new(BytesMut::new()),
            streams: Mutex::new(StreamTable::new()),
            connected: AtomicBool::new(false),
            sinks: EventSinks::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connects and performs the startup handshake.
    ///
    /// Resolves once the server reported READY, credentials (when
    /// demanded) were accepted and the configured initial keyspace, if
    /// any, is selected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!(addr = %self.config.addr, "connecting");

        let tcp = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout)?
        .map_err(ClientError::Io)?;

        tcp.set_nodelay(true).ok();

        let (read_half, write_half) = tokio::io::split(tcp);
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.inbound.lock().await.clear();

        self.startup().await?;
        if let Some(keyspace) = self.config.keyspace.clone() {
            self.use_keyspace_direct(&keyspace).await?;
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("connection ready");
        Ok(())
    }

    /// Sends STARTUP and walks the READY / AUTHENTICATE outcome.
    async fn startup(&self) -> Result<(), ClientError> {
        let mut options = BTreeMap::new();
        options.insert(CQL_VERSION_KEY.to_string(), CQL_VERSION.to_string());
        let mut body = CqlBuffer::new();
        body.pack_string_map(&options).map_err(ClientError::Protocol)?;

        tracing::debug!(cql_version = CQL_VERSION, "sending STARTUP");
        self.write_frame(Frame::request(HANDSHAKE_STREAM, Opcode::Startup, body.into_bytes()))
            .await?;

        let frame = self.read_frame_direct().await?;
        match frame.opcode {
            Opcode::Ready => Ok(()),
            Opcode::Authenticate => self.authenticate(frame).await,
            Opcode::Error => Err(server_error(&frame.body)),
            opcode => Err(ClientError::UnexpectedResponse {
                request: "STARTUP",
                opcode,
            }),
        }
    }

    /// Answers an AUTHENTICATE challenge with CREDENTIALS.
    async fn authenticate(&self, challenge: Frame) -> Result<(), ClientError> {
        let mut buf = CqlBuffer::from_bytes(&challenge.body);
        let class = buf.unpack_string().map_err(ClientError::Protocol)?;
        if class != PASSWORD_AUTHENTICATOR {
            return Err(ClientError::Auth(format!(
                "unrecognised authenticator: {class}"
            )));
        }
        let credentials = self.config.credentials.as_ref().ok_or_else(|| {
            ClientError::Auth("server requires authentication but no credentials were configured".to_string())
        })?;

        let mut map = BTreeMap::new();
        map.insert("username".to_string(), credentials.username.clone());
        map.insert("password".to_string(), credentials.password.clone());
        let mut body = CqlBuffer::new();
        body.pack_string_map(&map).map_err(ClientError::Protocol)?;

        tracing::debug!(username = %credentials.username, "sending CREDENTIALS");
        self.write_frame(Frame::request(HANDSHAKE_STREAM, Opcode::Credentials, body.into_bytes()))
            .await?;

        let frame = self.read_frame_direct().await?;
        match frame.opcode {
            Opcode::Ready => Ok(()),
            Opcode::Error => Err(server_error(&frame.body)),
            opcode => Err(ClientError::UnexpectedResponse {
                request: "CREDENTIALS",
                opcode,
            }),
        }
    }

    /// Selects the configured initial keyspace, still in the direct
    /// request/response phase of `connect`.
    async fn use_keyspace_direct(&self, keyspace: &str) -> Result<(), ClientError> {
        let cql = format!("USE {}", quote_identifier(keyspace));
        tracing::debug!(%cql, "selecting initial keyspace");
        let body = query_body(&cql, self.config.consistency)?;
        self.write_frame(Frame::request(HANDSHAKE_STREAM, Opcode::Query, body))
            .await?;

        let frame = self.read_frame_direct().await?;
        match frame.opcode {
            Opcode::Result => match CqlResult::decode(&frame.body).map_err(ClientError::Protocol)? {
                CqlResult::SetKeyspace(_) => Ok(()),
                _ => Err(ClientError::UnexpectedResult { request: "USE" }),
            },
            Opcode::Error => Err(server_error(&frame.body)),
            opcode => Err(ClientError::UnexpectedResponse {
                request: "USE",
                opcode,
            }),
        }
    }

    /// Submits a request, returning its completion handle.
    ///
    /// When a stream id is free the frame goes out immediately on the
    /// lowest free id; otherwise the request joins the FIFO queue and
    /// is transmitted as soon as a response frees a slot. Dropping the
    /// returned receiver cancels the request: a queued request is
    /// silently discarded, an in-flight one keeps its stream id
    /// reserved until the server's response arrives and is thrown away.
    pub async fn request(
        &self,
        opcode: Opcode,
        body: Bytes,
    ) -> Result<oneshot::Receiver<Result<Frame, ClientError>>, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            let streams = self.streams.lock().await;
            return match streams.closed_reason() {
                Some(reason) => Err(ClientError::closed(reason)),
                None => Err(ClientError::NotConnected),
            };
        }

        let (tx, rx) = oneshot::channel();
        let mut streams = self.streams.lock().await;
        match streams.submit(opcode, body, tx) {
            Submission::Write(frame) => {
                let stream = frame.stream;
                let encoded = match frame.encode() {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        streams.complete(stream);
                        return Err(ClientError::Protocol(err));
                    }
                };
                if let Err(err) = self.write_encoded(&encoded).await {
                    let reason = format!("write failed: {err}");
                    streams.fail_all(&reason);
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(err);
                }
                tracing::debug!(stream, %opcode, "request transmitted");
            }
            Submission::Queued => {
                tracing::debug!(queued = streams.queued(), %opcode, "all stream ids busy, request queued");
            }
            Submission::Rejected => {}
        }
        Ok(rx)
    }

    /// Sends a request and waits for its correlated response frame.
    async fn roundtrip(&self, opcode: Opcode, body: Bytes) -> Result<Frame, ClientError> {
        let rx = self.request(opcode, body).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::closed("connection closed")),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Asks the server which protocol options it supports.
    pub async fn options(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        let frame = self.roundtrip(Opcode::Options, Bytes::new()).await?;
        match frame.opcode {
            Opcode::Supported => {
                let mut buf = CqlBuffer::from_bytes(&frame.body);
                match buf.unpack_string_multimap() {
                    Ok(supported) => Ok(supported),
                    Err(err) => Err(self.fatal_protocol(err).await),
                }
            }
            opcode => Err(self.unexpected("OPTIONS", opcode).await),
        }
    }

    /// Runs a CQL query at the given consistency level.
    pub async fn query(&self, cql: &str, consistency: Consistency) -> Result<CqlResult, ClientError> {
        let body = query_body(cql, consistency)?;
        let frame = self.roundtrip(Opcode::Query, body).await?;
        self.expect_result("QUERY", frame).await
    }

    /// Prepares a CQL statement, returning the decoded prepared result.
    ///
    /// The upper layer wraps the id and parameter metadata into a
    /// [`crate::PreparedStatement`].
    pub async fn prepare(&self, cql: &str) -> Result<CqlResult, ClientError> {
        let mut buf = CqlBuffer::new();
        buf.pack_lstring(cql).map_err(ClientError::Protocol)?;
        let frame = self.roundtrip(Opcode::Prepare, buf.into_bytes()).await?;
        self.expect_result("PREPARE", frame).await
    }

    /// Executes a prepared statement by id with pre-encoded values.
    pub async fn execute(
        &self,
        id: &[u8],
        values: &[Option<Vec<u8>>],
        consistency: Consistency,
    ) -> Result<CqlResult, ClientError> {
        let mut buf = CqlBuffer::new();
        buf.pack_short_bytes(id).map_err(ClientError::Protocol)?;
        buf.pack_short(values.len() as u16);
        for value in values {
            buf.pack_bytes(value.as_deref()).map_err(ClientError::Protocol)?;
        }
        buf.pack_consistency(consistency);

        let frame = self.roundtrip(Opcode::Execute, buf.into_bytes()).await?;
        self.expect_result("EXECUTE", frame).await
    }

    /// Subscribes this connection to the named server events.
    pub async fn register(&self, events: &[&str]) -> Result<(), ClientError> {
        let mut buf = CqlBuffer::new();
        buf.pack_string_list(events).map_err(ClientError::Protocol)?;
        let frame = self.roundtrip(Opcode::Register, buf.into_bytes()).await?;
        match frame.opcode {
            Opcode::Ready => Ok(()),
            opcode => Err(self.unexpected("REGISTER", opcode).await),
        }
    }

    /// Subscribes to every event the server pushes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.sinks.subscribe()
    }

    /// Subscribes to one event name; those events no longer reach the
    /// generic subscription.
    pub fn subscribe_event(&self, name: &'static str) -> broadcast::Receiver<ServerEvent> {
        self.sinks.subscribe_named(name)
    }

    /// Closes the connection, failing every in-flight and queued
    /// request.
    pub async fn close(&self) {
        self.shutdown("connection closed").await;
    }

    // =========================================================================
    // Inbound path
    // =========================================================================

    /// Reads and dispatches responses and server events (call this in
    /// a background task).
    ///
    /// Returns when the connection dies; by then every pending request
    /// has been failed with the terminating error.
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        tracing::debug!("read loop started");
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let read = {
                let mut guard = self.reader.lock().await;
                let Some(reader) = guard.as_mut() else {
                    return Err(ClientError::NotConnected);
                };
                reader.read(&mut buf).await
            };
            let n = match read {
                Ok(n) => n,
                Err(err) => {
                    let reason = format!("read failed: {err}");
                    self.shutdown(&reason).await;
                    return Err(ClientError::Io(err));
                }
            };

            if n == 0 {
                self.shutdown("connection closed by server").await;
                return Err(ClientError::closed("connection closed by server"));
            }

            self.inbound.lock().await.extend_from_slice(&buf[..n]);

            loop {
                let decoded = {
                    let mut inbound = self.inbound.lock().await;
                    Frame::decode(&mut inbound)
                };
                match decoded {
                    Ok(Some(frame)) => self.dispatch(frame).await?,
                    Ok(None) => break,
                    Err(err) => {
                        let reason = format!("protocol violation: {err}");
                        self.shutdown(&reason).await;
                        return Err(ClientError::Protocol(err));
                    }
                }
            }
        }
    }

    /// Routes one inbound frame.
    ///
    /// A frame for an occupied stream slot completes that request and
    /// lets at most one queued request take over the freed id. An ERROR
    /// on stream 0 is connection-fatal; EVENT frames on stream -1 go to
    /// the event sinks; any other unsolicited frame is dropped.
    async fn dispatch(&self, frame: Frame) -> Result<(), ClientError> {
        if !frame.is_response() {
            let err = ProtocolError::UnsupportedVersion(frame.version);
            let reason = format!("protocol violation: {err}");
            self.shutdown(&reason).await;
            return Err(ClientError::Protocol(err));
        }

        let mut streams = self.streams.lock().await;
        if let Some(tx) = streams.complete(frame.stream) {
            let stream = frame.stream;
            let completion = if frame.opcode == Opcode::Error {
                Err(server_error(&frame.body))
            } else {
                Ok(frame)
            };
            if tx.send(completion).is_err() {
                tracing::trace!(stream, "response for cancelled request discarded");
            }

            while let Some(next) = streams.pop_queued(stream) {
                let opcode = next.opcode;
                match next.encode() {
                    Ok(encoded) => {
                        if let Err(err) = self.write_encoded(&encoded).await {
                            drop(streams);
                            let reason = format!("write failed: {err}");
                            self.shutdown(&reason).await;
                            return Err(err);
                        }
                        tracing::debug!(stream, %opcode, "queued request transmitted on freed stream id");
                        break;
                    }
                    Err(err) => {
                        // Fails only the oversized request; the next
                        // queued one gets its chance at the slot.
                        if let Some(tx) = streams.complete(stream) {
                            let _ = tx.send(Err(ClientError::Protocol(err)));
                        }
                    }
                }
            }
            return Ok(());
        }

        match (frame.stream, frame.opcode) {
            (UNSOLICITED_STREAM, Opcode::Error) => {
                drop(streams);
                let err = server_error(&frame.body);
                let reason = format!("connection-level server error: {err}");
                self.shutdown(&reason).await;
                Err(err)
            }
            (EVENT_STREAM, Opcode::Event) => {
                drop(streams);
                match ServerEvent::decode(&frame.body) {
                    Ok(event) => {
                        tracing::debug!(event = event.name(), "server event received");
                        self.sinks.dispatch(event);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "discarding undecodable event frame");
                    }
                }
                Ok(())
            }
            (stream, opcode) => {
                tracing::debug!(stream, %opcode, "discarding unsolicited frame");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Interprets a RESULT response, escalating malformed bodies and
    /// unknown result kinds to connection-fatal errors.
    async fn expect_result(&self, request: &'static str, frame: Frame) -> Result<CqlResult, ClientError> {
        match frame.opcode {
            Opcode::Result => match CqlResult::decode(&frame.body) {
                Ok(CqlResult::Unknown { kind, .. }) => {
                    let err = ClientError::UnknownResult { kind };
                    self.shutdown(&err.to_string()).await;
                    Err(err)
                }
                Ok(result) => Ok(result),
                Err(err) => Err(self.fatal_protocol(err).await),
            },
            opcode => Err(self.unexpected(request, opcode).await),
        }
    }

    /// Marks a protocol violation observed outside the read loop:
    /// closes the connection and fails everything in flight.
    async fn fatal_protocol(&self, err: ProtocolError) -> ClientError {
        let reason = format!("protocol violation: {err}");
        self.shutdown(&reason).await;
        ClientError::Protocol(err)
    }

    /// An opcode the request cannot answer is a protocol violation too.
    async fn unexpected(&self, request: &'static str, opcode: Opcode) -> ClientError {
        let err = ClientError::UnexpectedResponse { request, opcode };
        self.shutdown(&err.to_string()).await;
        err
    }

    /// Tears the connection down, failing every pending and queued
    /// request with the given reason. Idempotent.
    async fn shutdown(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        {
            let mut streams = self.streams.lock().await;
            tracing::debug!(
                reason,
                in_flight = streams.in_flight(),
                queued = streams.queued(),
                "closing connection"
            );
            streams.fail_all(reason);
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        *self.reader.lock().await = None;
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), ClientError> {
        let encoded = frame.encode().map_err(ClientError::Protocol)?;
        self.write_encoded(&encoded).await
    }

    async fn write_encoded(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(bytes).await.map_err(ClientError::Io)
    }

    /// Reads one response frame straight off the socket. Only used
    /// during the handshake, before the read loop runs.
    async fn read_frame_direct(&self) -> Result<Frame, ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            {
                let mut inbound = self.inbound.lock().await;
                if let Some(frame) = Frame::decode(&mut inbound).map_err(ClientError::Protocol)? {
                    if !frame.is_response() {
                        return Err(ClientError::Protocol(ProtocolError::UnsupportedVersion(
                            frame.version,
                        )));
                    }
                    return Ok(frame);
                }
            }

            let n = {
                let mut reader = self.reader.lock().await;
                let reader = reader.as_mut().ok_or(ClientError::NotConnected)?;
                reader.read(&mut buf).await.map_err(ClientError::Io)?
            };
            if n == 0 {
                return Err(ClientError::closed("connection closed during handshake"));
            }
            self.inbound.lock().await.extend_from_slice(&buf[..n]);
        }
    }
}

/// Builds a QUERY body: the CQL text as a long string, then the
/// consistency level.
fn query_body(cql: &str, consistency: Consistency) -> Result<Bytes, ClientError> {
    let mut buf = CqlBuffer::new();
    buf.pack_lstring(cql).map_err(ClientError::Protocol)?;
    buf.pack_consistency(consistency);
    Ok(buf.into_bytes())
}

/// Decodes an ERROR body into the per-request server error.
fn server_error(body: &[u8]) -> ClientError {
    let mut buf = CqlBuffer::from_bytes(body);
    match (buf.unpack_int(), buf.unpack_string()) {
        (Ok(code), Ok(message)) => ClientError::Server { code, message },
        (Err(err), _) | (_, Err(err)) => ClientError::Protocol(err),
    }
}
