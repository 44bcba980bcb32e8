//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::event::ServerEvent;
use crate::prepared::PreparedStatement;
use cqlio_protocol::{quote_identifier, Consistency, CqlResult, Metadata};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Cached prepared statements, keyed by CQL text.
///
/// Entries expire when the last handle for a statement is dropped: the
/// handle posts its text on the eviction channel and the next cache
/// access sweeps it out.
struct PreparedCache {
    entries: HashMap<String, (Vec<u8>, Metadata)>,
    evict_tx: mpsc::UnboundedSender<String>,
    evict_rx: mpsc::UnboundedReceiver<String>,
}

impl PreparedCache {
    fn new() -> Self {
        let (evict_tx, evict_rx) = mpsc::unbounded_channel();
        Self {
            entries: HashMap::new(),
            evict_tx,
            evict_rx,
        }
    }

    fn sweep(&mut self) {
        while let Ok(cql) = self.evict_rx.try_recv() {
            if self.entries.remove(&cql).is_some() {
                tracing::debug!(%cql, "evicted prepared statement");
            }
        }
    }
}

/// High-level client over one connection.
///
/// Owns the background read loop and the prepared-statement cache.
pub struct Client {
    conn: Arc<Connection>,
    worker: Mutex<Option<JoinHandle<()>>>,
    prepared: Mutex<PreparedCache>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
            worker: Mutex::new(None),
            prepared: Mutex::new(PreparedCache::new()),
        }
    }

    /// Connects, performs the handshake and starts the read loop.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await?;

        let conn = self.conn.clone();
        let worker = tokio::spawn(async move {
            if let Err(err) = conn.read_loop().await {
                tracing::debug!(%err, "read loop ended");
            }
        });
        *self.worker.lock().await = Some(worker);
        Ok(())
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection, failing everything still in flight.
    pub async fn close(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.abort();
        }
        self.conn.close().await;
    }

    /// The underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Runs a CQL query at the configured default consistency.
    pub async fn query(&self, cql: &str) -> Result<CqlResult, ClientError> {
        self.conn.query(cql, self.conn.config().consistency).await
    }

    /// Runs a CQL query at an explicit consistency level.
    pub async fn query_with(
        &self,
        cql: &str,
        consistency: Consistency,
    ) -> Result<CqlResult, ClientError> {
        self.conn.query(cql, consistency).await
    }

    /// Switches the connection to another keyspace.
    pub async fn use_keyspace(&self, keyspace: &str) -> Result<(), ClientError> {
        let cql = format!("USE {}", quote_identifier(keyspace));
        match self.query(&cql).await? {
            CqlResult::SetKeyspace(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResult { request: "USE" }),
        }
    }

    /// Prepares a statement, serving repeats from the cache.
    pub async fn prepare(&self, cql: &str) -> Result<PreparedStatement, ClientError> {
        {
            let mut cache = self.prepared.lock().await;
            cache.sweep();
            if let Some((id, metadata)) = cache.entries.get(cql) {
                tracing::debug!(%cql, "prepared statement served from cache");
                return Ok(PreparedStatement::new(
                    self.conn.clone(),
                    cql.to_string(),
                    id.clone(),
                    metadata.clone(),
                    cache.evict_tx.clone(),
                ));
            }
        }

        match self.conn.prepare(cql).await? {
            CqlResult::Prepared { id, metadata } => {
                let mut cache = self.prepared.lock().await;
                cache
                    .entries
                    .insert(cql.to_string(), (id.clone(), metadata.clone()));
                Ok(PreparedStatement::new(
                    self.conn.clone(),
                    cql.to_string(),
                    id,
                    metadata,
                    cache.evict_tx.clone(),
                ))
            }
            _ => Err(ClientError::UnexpectedResult { request: "PREPARE" }),
        }
    }

    /// Asks the server which protocol options it supports.
    pub async fn options(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        self.conn.options().await
    }

    /// Subscribes this connection to the named server events.
    pub async fn register(&self, events: &[&str]) -> Result<(), ClientError> {
        self.conn.register(events).await
    }

    /// Subscribes to every event the server pushes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.conn.subscribe_events()
    }

    /// Subscribes to one event name.
    pub fn subscribe_event(&self, name: &'static str) -> broadcast::Receiver<ServerEvent> {
        self.conn.subscribe_event(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use cqlio_protocol::metadata::FLAG_GLOBAL_TABLES_SPEC;
    use cqlio_protocol::{result, CqlBuffer, CqlValue, Frame, Opcode, RESPONSE_VERSION};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct Peer {
        socket: TcpStream,
        buf: BytesMut,
    }

    impl Peer {
        async fn read_frame(&mut self) -> Frame {
            let mut chunk = [0u8; 4096];
            loop {
                if let Some(frame) = Frame::decode(&mut self.buf).unwrap() {
                    return frame;
                }
                let n = self.socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed the connection mid-script");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }

        async fn send(&mut self, stream: i8, opcode: Opcode, body: &[u8]) {
            let mut out = vec![RESPONSE_VERSION, 0x00, stream as u8, opcode as u8];
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend_from_slice(body);
            self.socket.write_all(&out).await.unwrap();
        }

        async fn handshake(&mut self) {
            let startup = self.read_frame().await;
            assert_eq!(startup.opcode, Opcode::Startup);
            self.send(startup.stream, Opcode::Ready, &[]).await;
        }

        async fn answer_prepare(&mut self, expected_cql: &str, id: &[u8]) {
            let prepare = self.read_frame().await;
            assert_eq!(prepare.opcode, Opcode::Prepare);
            let mut body = CqlBuffer::from_bytes(&prepare.body);
            assert_eq!(body.unpack_lstring().unwrap(), expected_cql);

            let mut prepared = CqlBuffer::new();
            prepared.pack_int(result::kind::PREPARED);
            prepared.pack_short_bytes(id).unwrap();
            prepared.pack_int(FLAG_GLOBAL_TABLES_SPEC);
            prepared.pack_int(2);
            prepared.pack_string("test").unwrap();
            prepared.pack_string("tbl1").unwrap();
            prepared.pack_string("key").unwrap();
            prepared.pack_short(0x0D);
            prepared.pack_string("i1").unwrap();
            prepared.pack_short(0x09);
            self.send(prepare.stream, Opcode::Result, prepared.as_slice())
                .await;
        }
    }

    async fn spawn_peer<F, Fut>(script: F) -> SocketAddr
    where
        F: FnOnce(Peer) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            script(Peer {
                socket,
                buf: BytesMut::new(),
            })
            .await;
        });
        addr
    }

    const INSERT_CQL: &str = "INSERT INTO tbl1 (key, i1) VALUES (?, ?);";

    #[tokio::test]
    async fn test_prepare_and_execute_named() {
        let addr = spawn_peer(|mut peer| async move {
            peer.handshake().await;
            peer.answer_prepare(INSERT_CQL, &[0x01, 0x02]).await;

            let execute = peer.read_frame().await;
            assert_eq!(execute.opcode, Opcode::Execute);

            // id as short bytes, short count, then the two values
            let mut body = CqlBuffer::from_bytes(&execute.body);
            assert_eq!(body.unpack_short_bytes().unwrap().as_ref(), &[0x01, 0x02]);
            assert_eq!(body.unpack_short().unwrap(), 2);
            assert_eq!(
                body.unpack_bytes().unwrap().as_deref(),
                Some(&b"another-key"[..])
            );
            assert_eq!(
                body.unpack_bytes().unwrap().as_deref(),
                Some(&[0x07, 0x5B, 0xCD, 0x15][..])
            );
            assert_eq!(
                body.unpack_consistency().unwrap(),
                Consistency::One
            );

            peer.send(
                execute.stream,
                Opcode::Result,
                &result::kind::VOID.to_be_bytes(),
            )
            .await;
        })
        .await;

        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();

        let statement = client.prepare(INSERT_CQL).await.unwrap();
        assert_eq!(statement.id(), &[0x01, 0x02]);

        let result = statement
            .execute_named(
                &[
                    ("key", Some(CqlValue::Text("another-key".into()))),
                    ("i1", Some(CqlValue::Int(123_456_789))),
                ],
                Consistency::One,
            )
            .await
            .unwrap();
        assert!(matches!(result, CqlResult::Void));
    }

    #[tokio::test]
    async fn test_prepare_is_cached() {
        let addr = spawn_peer(|mut peer| async move {
            peer.handshake().await;
            // Exactly one PREPARE reaches the wire
            peer.answer_prepare(INSERT_CQL, &[0xAA]).await;
        })
        .await;

        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();

        let first = client.prepare(INSERT_CQL).await.unwrap();
        let second = client.prepare(INSERT_CQL).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(client.prepared.lock().await.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_handles_evicts_cache_entry() {
        let addr = spawn_peer(|mut peer| async move {
            peer.handshake().await;
            peer.answer_prepare(INSERT_CQL, &[0xAA]).await;
            // The re-prepare after eviction reaches the wire again
            peer.answer_prepare(INSERT_CQL, &[0xBB]).await;
        })
        .await;

        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();

        let statement = client.prepare(INSERT_CQL).await.unwrap();
        assert_eq!(statement.id(), &[0xAA]);
        drop(statement);

        let statement = client.prepare(INSERT_CQL).await.unwrap();
        assert_eq!(statement.id(), &[0xBB]);
    }

    #[tokio::test]
    async fn test_query_uses_default_consistency() {
        let addr = spawn_peer(|mut peer| async move {
            peer.handshake().await;

            let query = peer.read_frame().await;
            let mut body = CqlBuffer::from_bytes(&query.body);
            body.unpack_lstring().unwrap();
            assert_eq!(body.unpack_consistency().unwrap(), Consistency::All);

            peer.send(
                query.stream,
                Opcode::Result,
                &result::kind::VOID.to_be_bytes(),
            )
            .await;
        })
        .await;

        let client = Client::new(ConnectionConfig::new(addr).with_consistency(Consistency::All));
        client.connect().await.unwrap();
        let result = client.query("INSERT INTO t (a) VALUES (1);").await.unwrap();
        assert!(matches!(result, CqlResult::Void));
    }

    #[tokio::test]
    async fn test_use_keyspace() {
        let addr = spawn_peer(|mut peer| async move {
            peer.handshake().await;

            let query = peer.read_frame().await;
            let mut body = CqlBuffer::from_bytes(&query.body);
            assert_eq!(body.unpack_lstring().unwrap(), "USE \"Mixed Case\"");

            let mut response = CqlBuffer::new();
            response.pack_int(result::kind::SET_KEYSPACE);
            response.pack_string("Mixed Case").unwrap();
            peer.send(query.stream, Opcode::Result, response.as_slice())
                .await;
        })
        .await;

        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();
        client.use_keyspace("Mixed Case").await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending_requests() {
        let addr = spawn_peer(|mut peer| async move {
            peer.handshake().await;
            // Swallow the query and never answer
            let _query = peer.read_frame().await;
            std::future::pending::<()>().await;
        })
        .await;

        let client = Arc::new(Client::new(ConnectionConfig::new(addr)));
        client.connect().await.unwrap();

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.query("SELECT * FROM t;").await })
        };
        // Let the query reach the wire before tearing the connection down
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        client.close().await;
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed { .. }));
        assert!(!client.is_connected());
    }
}
