use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{QueryError, TransportError};
use crate::pending::ResultHandle;
use crate::protocol::{Query, StatusAttributes};

/// Submission client for a Gremlin-style graph endpoint.
///
/// Queries are submitted without blocking and answered through a
/// [`ResultHandle`]; [`GraphClient::query`] is the blocking convenience.
///
/// # Example
///
/// ```rust,ignore
/// use airgraph_client::{ConnectionConfig, GraphClient};
///
/// let config = ConnectionConfig::new("tcp://localhost:8182", "/dbs/air/colls/routes", key);
/// let client = GraphClient::connect(&config).await?;
/// let result = client.query("g.V().count()").await?;
/// println!("records: {}", result.total_records);
/// client.close().await;
/// ```
pub struct GraphClient {
    connection: Connection,
}

/// Records and terminal attributes of a completed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub records: Vec<Value>,
    pub total_records: usize,
    pub status_attributes: StatusAttributes,
}

impl QueryResult {
    pub fn new(records: Vec<Value>, status_attributes: StatusAttributes) -> Self {
        let total_records = records.len();
        Self {
            records,
            total_records,
            status_attributes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    /// Request units charged for the query, when the server reports them.
    pub fn request_charge(&self) -> Option<f64> {
        self.status_attributes
            .total_request_charge()
            .or_else(|| self.status_attributes.request_charge())
    }
}

impl GraphClient {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, TransportError> {
        Ok(Self::new(Connection::open(config).await?))
    }

    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Queue a query for transmission and return its handle immediately.
    pub fn submit(&self, query: impl Into<Query>) -> Result<ResultHandle, TransportError> {
        self.connection.submit(query.into())
    }

    /// Submit a query and wait for its terminal frame.
    #[instrument(skip(self, query), fields(query = %query.text()))]
    pub async fn query_with(&self, query: Query) -> Result<QueryResult, QueryError> {
        let mut handle = self.submit(query)?;
        let records = handle.await_all().await?;
        let status_attributes = handle.status_attributes().unwrap_or_default();
        debug!(records = records.len(), "query completed");
        Ok(QueryResult::new(records, status_attributes))
    }

    pub async fn query(&self, query: impl Into<Query>) -> Result<QueryResult, QueryError> {
        self.query_with(query.into()).await
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}
