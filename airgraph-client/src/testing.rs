//! Scripted server for unit tests.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::classify::vendor;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::TransportError;
use crate::protocol::{status, Frame, FrameCodec, JsonCodec, RequestMessage};
use crate::transport::{channel_pair, ChannelPeer};

pub(crate) fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("tcp://localhost:8182", "/dbs/air/colls/routes", "test-key")
}

/// JSON codec that refuses to encode queries containing `marker`.
pub(crate) struct RejectingCodec {
    pub(crate) marker: &'static str,
}

impl FrameCodec for RejectingCodec {
    fn encode(&self, request: &RequestMessage) -> Result<String, TransportError> {
        match &request.args.gremlin {
            Some(gremlin) if gremlin.contains(self.marker) => Err(TransportError::Codec(
                format!("cannot encode '{gremlin}'"),
            )),
            _ => JsonCodec.encode(request),
        }
    }

    fn decode(&self, payload: &str) -> Result<Frame, TransportError> {
        JsonCodec.decode(payload)
    }
}

/// Open a connection over an in-process transport, answering the handshake.
pub(crate) async fn open_connection() -> Result<(Connection, MockServer)> {
    open_connection_with(Arc::new(JsonCodec)).await
}

pub(crate) async fn open_connection_with(
    codec: Arc<dyn FrameCodec>,
) -> Result<(Connection, MockServer)> {
    let (transport, peer) = channel_pair();
    let mut server = MockServer::new(peer);
    let config = test_config();
    let (connection, auth) = tokio::join!(
        Connection::open_with(transport, codec, &config),
        server.accept_auth()
    );
    auth?;
    let connection = connection.map_err(|e| anyhow!(e.to_string()))?;
    Ok((connection, server))
}

pub(crate) struct MockServer {
    peer: ChannelPeer,
}

impl MockServer {
    pub(crate) fn new(peer: ChannelPeer) -> Self {
        Self { peer }
    }

    pub(crate) async fn next_request(&mut self) -> Result<Value> {
        let payload = self
            .peer
            .recv()
            .await
            .ok_or_else(|| anyhow!("client closed the link"))?;
        Ok(serde_json::from_str(&payload)?)
    }

    pub(crate) async fn accept_auth(&mut self) -> Result<Value> {
        let request = self.next_request().await?;
        if request["op"] != "authentication" {
            return Err(anyhow!("expected authentication, got {request}"));
        }
        self.respond(&request, status::SUCCESS, "", json!(null), json!({}))?;
        Ok(request)
    }

    pub(crate) fn respond(
        &self,
        request: &Value,
        code: u16,
        message: &str,
        data: Value,
        attributes: Value,
    ) -> Result<()> {
        let frame = json!({
            "requestId": request["requestId"],
            "status": {"code": code, "message": message, "attributes": attributes},
            "result": {"data": data, "meta": {}},
        });
        self.send_raw(frame.to_string())
    }

    pub(crate) fn partial(&self, request: &Value, data: Value) -> Result<()> {
        self.respond(request, status::PARTIAL_CONTENT, "", data, json!({}))
    }

    pub(crate) fn success(&self, request: &Value, data: Value, attributes: Value) -> Result<()> {
        self.respond(request, status::SUCCESS, "", data, attributes)
    }

    /// Terminal failure carrying a vendor status code.
    pub(crate) fn failure(&self, request: &Value, vendor_code: i64) -> Result<()> {
        let mut attributes = json!({"x-ms-status-code": vendor_code});
        if vendor_code == vendor::TOO_MANY_REQUESTS {
            attributes["x-ms-retry-after-ms"] = json!(25);
        }
        self.respond(
            request,
            status::SERVER_ERROR,
            "request failed",
            json!(null),
            attributes,
        )
    }

    pub(crate) fn send_raw(&self, payload: impl Into<String>) -> Result<()> {
        self.peer.send(payload).map_err(|e| anyhow!(e.to_string()))
    }
}
