//! Prepared statements.

use crate::connection::Connection;
use crate::error::ClientError;
use cqlio_protocol::{Consistency, CqlResult, CqlValue, Metadata};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A server-side prepared statement.
///
/// Carries the opaque server-assigned id, the original CQL text and
/// the parameter metadata the server returned. Values bound by
/// position or by name are encoded through that metadata and shipped
/// with EXECUTE.
///
/// Dropping the handle notifies the owning [`crate::Client`] to evict
/// the CQL text from its prepared-statement cache; during process
/// teardown, when the client is already gone, the notification is
/// silently discarded.
pub struct PreparedStatement {
    conn: Arc<Connection>,
    cql: String,
    id: Vec<u8>,
    metadata: Metadata,
    evictions: mpsc::UnboundedSender<String>,
}

impl PreparedStatement {
    pub(crate) fn new(
        conn: Arc<Connection>,
        cql: String,
        id: Vec<u8>,
        metadata: Metadata,
        evictions: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            conn,
            cql,
            id,
            metadata,
            evictions,
        }
    }

    /// The statement's CQL text.
    pub fn cql(&self) -> &str {
        &self.cql
    }

    /// The server-assigned statement id.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Metadata describing the bind parameters.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Executes with positional bindings. `None` binds null.
    pub async fn execute(
        &self,
        values: &[Option<CqlValue>],
        consistency: Consistency,
    ) -> Result<CqlResult, ClientError> {
        let cells = self.metadata.encode_row(values)?;
        self.conn.execute(&self.id, &cells, consistency).await
    }

    /// Executes with named bindings, resolved against the parameter
    /// metadata by column name or short name.
    ///
    /// An unknown name or two bindings landing on the same parameter is
    /// a [`ClientError::Binding`]. Parameters left unbound are sent as
    /// null.
    pub async fn execute_named(
        &self,
        bindings: &[(&str, Option<CqlValue>)],
        consistency: Consistency,
    ) -> Result<CqlResult, ClientError> {
        let values = self.resolve_bindings(bindings)?;
        self.execute(&values, consistency).await
    }

    fn resolve_bindings(
        &self,
        bindings: &[(&str, Option<CqlValue>)],
    ) -> Result<Vec<Option<CqlValue>>, ClientError> {
        let mut slots: Vec<Option<Option<CqlValue>>> = vec![None; self.metadata.len()];
        for (name, value) in bindings {
            let index = self.metadata.find_column(name).ok_or_else(|| {
                ClientError::Binding(format!("unknown parameter: {name}"))
            })?;
            if slots[index].is_some() {
                return Err(ClientError::Binding(format!(
                    "parameter bound twice: {name}"
                )));
            }
            slots[index] = Some(value.clone());
        }
        Ok(slots.into_iter().map(Option::flatten).collect())
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        let _ = self.evictions.send(std::mem::take(&mut self.cql));
    }
}
