use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub const DEFAULT_GRAPH_NAMESPACE: &str = "g";

fn default_graph_namespace() -> String {
    DEFAULT_GRAPH_NAMESPACE.to_string()
}

/// Endpoint and credentials for one connection.
///
/// For Cosmos-style services the principal is the collection path
/// (`/dbs/<database>/colls/<graph>`) and the secret is the account key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint_uri: String,
    /// Traversal source the query's `g` is bound to.
    #[serde(default = "default_graph_namespace")]
    pub graph_namespace: String,
    pub principal: String,
    pub secret: String,
}

impl ConnectionConfig {
    pub fn new(
        endpoint_uri: impl Into<String>,
        principal: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_uri: endpoint_uri.into(),
            graph_namespace: default_graph_namespace(),
            principal: principal.into(),
            secret: secret.into(),
        }
    }

    pub fn with_graph_namespace(mut self, graph_namespace: impl Into<String>) -> Self {
        self.graph_namespace = graph_namespace.into();
        self
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.endpoint_uri.trim().is_empty() {
            return Err(TransportError::Configuration(
                "endpoint_uri must not be empty".to_string(),
            ));
        }
        if self.graph_namespace.trim().is_empty() {
            return Err(TransportError::Configuration(
                "graph_namespace must not be empty".to_string(),
            ));
        }
        if self.principal.is_empty() {
            return Err(TransportError::Configuration(
                "principal must not be empty".to_string(),
            ));
        }
        if self.secret.is_empty() {
            return Err(TransportError::Configuration(
                "secret must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint_uri", &self.endpoint_uri)
            .field("graph_namespace", &self.graph_namespace)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}
