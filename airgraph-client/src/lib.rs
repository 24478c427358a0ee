//! Asynchronous submission client for Gremlin-style graph endpoints.
//!
//! A [`Connection`] holds one authenticated link and multiplexes any number of
//! in-flight requests over it. [`GraphClient`] submits queries and hands back
//! a [`ResultHandle`] per query; [`BulkLoader`] drives a sequence of queries
//! built from input records and reports per-record outcomes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use airgraph_client::{ConnectionConfig, GraphClient};
//!
//! let config = ConnectionConfig::new("wss://localhost:443/", "/dbs/air/colls/routes", key);
//! let client = GraphClient::connect(&config).await?;
//! let mut handle = client.submit("g.V().count()")?;
//! let records = handle.await_all().await?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod loader;
pub mod pending;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod testing;

pub use classify::{classify, ErrorCategory};
pub use client::{GraphClient, QueryResult};
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::{MalformedRecord, ProtocolError, QueryError, TransportError};
pub use loader::{BulkLoader, LoadError, LoadOutcome, LoadReport, RecordOutcome};
pub use pending::{Resolution, ResultHandle};
pub use protocol::{FrameCodec, JsonCodec, Query, RequestId, StatusAttributes};
pub use transport::{
    channel_pair, is_websocket, ChannelPeer, ChannelTransport, TcpTransport, Transport, WsTransport,
};
