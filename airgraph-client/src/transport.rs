//! Byte-level links carrying encoded messages.
//!
//! A [`Transport`] moves whole messages; framing the protocol on top of it is
//! the codec's job. Three implementations ship with the client:
//! - [`WsTransport`]: Gremlin server framing over `ws://` or `wss://`
//! - [`TcpTransport`]: newline-delimited messages over a TCP stream
//! - [`ChannelTransport`]: an in-process pair, used for embedding and tests

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, payload: String) -> Result<(), TransportError>;

    /// Next inbound message, or `None` once the peer has closed the link.
    ///
    /// Must be cancel safe: the connection polls it inside `select!`.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Mime type announced in front of every request sent over a WebSocket.
pub const GREMLIN_MIME_TYPE: &str = "application/vnd.gremlin-v2.0+json";

/// Whether `endpoint` names a WebSocket (`ws://` or `wss://`) server.
pub fn is_websocket(endpoint: &str) -> bool {
    matches!(
        endpoint.trim().split_once("://"),
        Some(("ws", _)) | Some(("wss", _))
    )
}

/// Resolve `tcp://host:port` or `host:port` to a socket address string.
pub fn tcp_address(endpoint: &str) -> Result<String, TransportError> {
    let endpoint = endpoint.trim();
    let address = match endpoint.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(TransportError::InvalidEndpoint(format!(
                "{endpoint} (unsupported scheme '{scheme}')"
            )))
        }
        None => endpoint,
    };
    let address = address.trim_end_matches('/');
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(address.to_string())
        }
        _ => Err(TransportError::InvalidEndpoint(endpoint.to_string())),
    }
}

/// Newline-delimited messages over TCP.
pub struct TcpTransport {
    peer: String,
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TcpTransport {
    #[instrument]
    pub async fn connect(endpoint: &str) -> Result<Self, TransportError> {
        let address = tcp_address(endpoint)?;
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        info!(%address, "tcp transport connected");
        Ok(Self::from_stream(stream, address))
    }

    pub fn from_stream(stream: TcpStream, peer: impl Into<String>) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer: peer.into(),
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.writer.write_all(payload.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.reader.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!(peer = %self.peer, "shutting down tcp transport");
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Gremlin server WebSocket framing.
///
/// Requests go out as binary messages prefixed with the length of
/// [`GREMLIN_MIME_TYPE`] and the mime type itself. Responses arrive as text or
/// binary messages holding one JSON frame each.
pub struct WsTransport {
    endpoint: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    #[instrument]
    pub async fn connect(endpoint: &str) -> Result<Self, TransportError> {
        if !is_websocket(endpoint) {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }
        let endpoint = endpoint.trim().to_string();
        let (stream, response) = connect_async(endpoint.as_str()).await.map_err(|source| {
            TransportError::WebSocket {
                endpoint: endpoint.clone(),
                source: Box::new(source),
            }
        })?;
        info!(%endpoint, status = %response.status(), "websocket transport connected");
        Ok(Self { endpoint, stream })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Prefix `payload` with the Gremlin mime header.
fn gremlin_binary(payload: &str) -> Vec<u8> {
    let mime = GREMLIN_MIME_TYPE.as_bytes();
    let mut message = Vec::with_capacity(1 + mime.len() + payload.len());
    message.push(mime.len() as u8);
    message.extend_from_slice(mime);
    message.extend_from_slice(payload.as_bytes());
    message
}

fn websocket_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(err) => TransportError::Io(err),
        other => TransportError::Lost(other.to_string()),
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(gremlin_binary(&payload)))
            .await
            .map_err(websocket_error)
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|err| TransportError::Codec(err.to_string()))
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(endpoint = %self.endpoint, ?frame, "websocket closed by peer");
                    return Ok(None);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                ))
                | None => return Ok(None),
                Some(Err(err)) => return Err(websocket_error(err)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!(endpoint = %self.endpoint, "closing websocket transport");
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "websocket close failed");
                Err(websocket_error(err))
            }
        }
    }
}

/// Create a connected in-process transport and the peer end serving it.
pub fn channel_pair() -> (ChannelTransport, ChannelPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            outgoing: Some(to_peer),
            incoming: from_peer,
        },
        ChannelPeer {
            incoming: from_client,
            outgoing: to_client,
        },
    )
}

/// Client end of [`channel_pair`].
pub struct ChannelTransport {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        outgoing
            .send(payload)
            .map_err(|_| TransportError::Lost("peer dropped".to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.incoming.recv().await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outgoing.take();
        Ok(())
    }
}

/// Server end of [`channel_pair`].
pub struct ChannelPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl ChannelPeer {
    /// Next message sent by the client, or `None` once it closed the link.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    pub fn send(&self, payload: impl Into<String>) -> Result<(), TransportError> {
        self.outgoing
            .send(payload.into())
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn tcp_address_accepts_plain_and_tcp_scheme() -> Result<()> {
        assert_eq!(
            tcp_address("tcp://localhost:8182").map_err(|e| anyhow!(e.to_string()))?,
            "localhost:8182"
        );
        assert_eq!(
            tcp_address(" 127.0.0.1:8182/ ").map_err(|e| anyhow!(e.to_string()))?,
            "127.0.0.1:8182"
        );
        Ok(())
    }

    #[test]
    fn websocket_schemes_are_recognized() {
        assert!(is_websocket("wss://account.gremlin.cosmos.azure.com:443/"));
        assert!(is_websocket(" ws://localhost:8182/gremlin"));
        assert!(!is_websocket("tcp://localhost:8182"));
        assert!(!is_websocket("localhost:8182"));
        assert!(!is_websocket("https://localhost:8182"));
    }

    #[test]
    fn gremlin_binary_carries_mime_header() {
        let message = gremlin_binary("{}");
        assert_eq!(message[0] as usize, GREMLIN_MIME_TYPE.len());
        assert_eq!(&message[1..=GREMLIN_MIME_TYPE.len()], GREMLIN_MIME_TYPE.as_bytes());
        assert!(message.ends_with(b"{}"));
    }

    #[tokio::test]
    async fn websocket_transport_exchanges_gremlin_frames() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            let mut socket = tokio_tungstenite::accept_async(stream).await?;
            let request = socket
                .next()
                .await
                .ok_or_else(|| anyhow!("client closed before sending"))??;
            socket.send(Message::Text("first".to_string())).await?;
            socket.send(Message::Binary(b"second".to_vec())).await?;
            socket.close(None).await?;
            Ok::<_, anyhow::Error>(request.into_data())
        });

        let mut transport = WsTransport::connect(&format!("ws://{address}/gremlin"))
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        assert_eq!(transport.endpoint(), format!("ws://{address}/gremlin"));
        transport
            .send("{\"op\":\"eval\"}".to_string())
            .await
            .map_err(|e| anyhow!(e.to_string()))?;

        let mut received = Vec::new();
        while let Some(message) = transport.recv().await.map_err(|e| anyhow!(e.to_string()))? {
            received.push(message);
        }
        assert_eq!(received, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(server.await??, gremlin_binary("{\"op\":\"eval\"}"));
        Ok(())
    }

    #[tokio::test]
    async fn websocket_connect_failure_names_endpoint() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let endpoint = format!("ws://{}", listener.local_addr()?);
        drop(listener);
        match WsTransport::connect(&endpoint).await {
            Err(TransportError::WebSocket { endpoint: named, .. }) => assert_eq!(named, endpoint),
            Err(other) => return Err(anyhow!("unexpected error {other}")),
            Ok(_) => return Err(anyhow!("connect to closed port succeeded")),
        }
        Ok(())
    }

    #[test]
    fn tcp_address_rejects_websocket_and_missing_port() {
        assert!(matches!(
            tcp_address("wss://account.gremlin.cosmos.azure.com:443/"),
            Err(TransportError::InvalidEndpoint(msg)) if msg.contains("wss")
        ));
        assert!(matches!(
            tcp_address("localhost"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            tcp_address("localhost:http"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn channel_pair_moves_messages_both_ways() -> Result<()> {
        let (mut transport, mut peer) = channel_pair();
        transport
            .send("ping".to_string())
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        assert_eq!(peer.recv().await.as_deref(), Some("ping"));

        peer.send("pong").map_err(|e| anyhow!(e.to_string()))?;
        let received = transport.recv().await.map_err(|e| anyhow!(e.to_string()))?;
        assert_eq!(received.as_deref(), Some("pong"));

        transport.close().await.map_err(|e| anyhow!(e.to_string()))?;
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            transport.send("late".to_string()).await,
            Err(TransportError::Closed)
        ));

        drop(peer);
        let eof = transport.recv().await.map_err(|e| anyhow!(e.to_string()))?;
        assert!(eof.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn tcp_transport_frames_messages_by_line() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await?;
            write_half.write_all(b"\nfirst\nsecond\n").await?;
            write_half.shutdown().await?;
            Ok::<_, std::io::Error>(line)
        });

        let mut transport = TcpTransport::connect(&format!("tcp://{address}"))
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        assert_eq!(transport.peer(), address);
        transport
            .send("{\"op\":\"eval\"}".to_string())
            .await
            .map_err(|e| anyhow!(e.to_string()))?;

        let mut received = Vec::new();
        while let Some(line) = transport.recv().await.map_err(|e| anyhow!(e.to_string()))? {
            received.push(line);
        }
        assert_eq!(received, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(server.await??.as_deref(), Some("{\"op\":\"eval\"}"));
        Ok(())
    }

    #[tokio::test]
    async fn tcp_connect_failure_names_endpoint() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        drop(listener);
        match TcpTransport::connect(&address).await {
            Err(TransportError::Connect { endpoint, .. }) => assert_eq!(endpoint, address),
            Err(other) => return Err(anyhow!("unexpected error {other}")),
            Ok(_) => return Err(anyhow!("connect to closed port succeeded")),
        }
        Ok(())
    }
}
