//! Persistent, authenticated link to the query endpoint.
//!
//! The connection:
//! - Performs the SASL handshake before anything else is sent
//! - Queues outbound requests without blocking the submitting task
//! - Runs one background worker that owns the transport
//! - Routes inbound frames to their pending request through the dispatch table
//! - Fails every outstanding request when the link is closed or lost

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{QueryError, TransportError};
use crate::pending::{PendingRequest, ResultHandle};
use crate::protocol::status::AUTHENTICATE;
use crate::protocol::{Frame, FrameCodec, JsonCodec, Query, RequestId, RequestMessage};
use crate::transport::{is_websocket, TcpTransport, Transport, WsTransport};

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Appended,
    Resolved,
    Ignored,
    Unrouted,
}

enum TableState {
    Open,
    Closed,
    Lost(String),
}

struct DispatchInner {
    entries: HashMap<RequestId, PendingRequest>,
    state: TableState,
}

/// Request id → pending request, shared by the submit and receive paths.
pub(crate) struct DispatchTable {
    inner: Mutex<DispatchInner>,
}

impl DispatchTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(DispatchInner {
                entries: HashMap::new(),
                state: TableState::Open,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a request. Rejected once the table has been shut down.
    pub(crate) fn insert(&self, pending: PendingRequest) -> Result<(), TransportError> {
        let mut inner = self.lock();
        match &inner.state {
            TableState::Open => {
                inner.entries.insert(pending.request_id(), pending);
                Ok(())
            }
            TableState::Closed => Err(TransportError::Closed),
            TableState::Lost(reason) => Err(TransportError::Lost(reason.clone())),
        }
    }

    pub(crate) fn remove(&self, request_id: &RequestId) -> Option<PendingRequest> {
        self.lock().entries.remove(request_id)
    }

    pub(crate) fn deliver(&self, frame: Frame) -> Delivery {
        let request_id = frame.request_id();
        let mut inner = self.lock();
        if frame.is_terminal() {
            let Some(pending) = inner.entries.remove(&request_id) else {
                return Delivery::Unrouted;
            };
            drop(inner);
            if pending.apply(frame) {
                Delivery::Resolved
            } else {
                Delivery::Ignored
            }
        } else {
            match inner.entries.get(&request_id) {
                Some(pending) if pending.apply(frame) => Delivery::Appended,
                Some(_) => Delivery::Ignored,
                None => Delivery::Unrouted,
            }
        }
    }

    /// Stop accepting requests and fail everything outstanding.
    ///
    /// `reason` is `None` for an orderly close. Returns the number of requests
    /// that were failed.
    pub(crate) fn shutdown(&self, reason: Option<String>) -> usize {
        let (drained, error) = {
            let mut inner = self.lock();
            if !matches!(inner.state, TableState::Open) {
                return 0;
            }
            let error = match &reason {
                Some(reason) => QueryError::Transport(format!("connection lost: {reason}")),
                None => QueryError::Transport("connection closed".to_string()),
            };
            inner.state = match reason {
                Some(reason) => TableState::Lost(reason),
                None => TableState::Closed,
            };
            let drained: Vec<PendingRequest> =
                inner.entries.drain().map(|(_, pending)| pending).collect();
            (drained, error)
        };
        drained
            .into_iter()
            .filter(|pending| pending.fail(error.clone()))
            .count()
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self.lock().state, TableState::Open)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

enum Outbound {
    Request(RequestMessage),
    Shutdown(oneshot::Sender<()>),
}

/// One persistent link to the query endpoint.
pub struct Connection {
    endpoint: String,
    traversal_source: String,
    dispatch: Arc<DispatchTable>,
    outbound: mpsc::UnboundedSender<Outbound>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect with the JSON codec and authenticate.
    ///
    /// `ws://` and `wss://` endpoints use a WebSocket transport; anything
    /// else is treated as a plain TCP address.
    #[instrument(skip(config), fields(endpoint = %config.endpoint_uri))]
    pub async fn open(config: &ConnectionConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let codec: Arc<dyn FrameCodec> = Arc::new(JsonCodec);
        if is_websocket(&config.endpoint_uri) {
            let transport = WsTransport::connect(&config.endpoint_uri).await?;
            Self::open_with(transport, codec, config).await
        } else {
            let transport = TcpTransport::connect(&config.endpoint_uri).await?;
            Self::open_with(transport, codec, config).await
        }
    }

    /// Authenticate over an already established transport and start the
    /// background worker.
    pub async fn open_with<T>(
        mut transport: T,
        codec: Arc<dyn FrameCodec>,
        config: &ConnectionConfig,
    ) -> Result<Self, TransportError>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        if let Err(err) = authenticate(&mut transport, codec.as_ref(), config).await {
            warn!(endpoint = %config.endpoint_uri, error = %err, "handshake failed");
            if let Err(close_err) = transport.close().await {
                debug!(error = %close_err, "failed to close transport after handshake failure");
            }
            return Err(err);
        }

        let dispatch = Arc::new(DispatchTable::new());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let worker = ConnectionWorker {
            endpoint: config.endpoint_uri.clone(),
            transport,
            codec,
            dispatch: dispatch.clone(),
            outbound: outbound_rx,
        };
        let handle = tokio::spawn(worker.run());
        info!(endpoint = %config.endpoint_uri, "connection established");

        Ok(Self {
            endpoint: config.endpoint_uri.clone(),
            traversal_source: config.graph_namespace.clone(),
            dispatch,
            outbound: outbound_tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn traversal_source(&self) -> &str {
        &self.traversal_source
    }

    pub fn is_open(&self) -> bool {
        self.dispatch.is_open()
    }

    /// Requests submitted but not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.dispatch.len()
    }

    /// Register a request and queue it for transmission. Never blocks.
    pub(crate) fn submit(&self, query: Query) -> Result<ResultHandle, TransportError> {
        let request_id = RequestId::new();
        let request = RequestMessage::eval(request_id, &query, &self.traversal_source);
        let (pending, handle) = PendingRequest::new(request_id, query);
        self.dispatch.insert(pending)?;
        if self.outbound.send(Outbound::Request(request)).is_err() {
            self.dispatch.remove(&request_id);
            return Err(TransportError::Closed);
        }
        trace!(%request_id, "request queued");
        Ok(handle)
    }

    /// Close the link and fail outstanding requests. Idempotent.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn close(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(worker) = worker else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.outbound.send(Outbound::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(err) = worker.await {
            warn!(error = %err, "connection worker terminated abnormally");
        }
        self.dispatch.shutdown(None);
        info!("connection closed");
    }
}

async fn authenticate<T: Transport>(
    transport: &mut T,
    codec: &dyn FrameCodec,
    config: &ConnectionConfig,
) -> Result<(), TransportError> {
    let request_id = RequestId::new();
    let request = RequestMessage::authentication(request_id, &config.principal, &config.secret);
    let credentials = codec.encode(&request)?;
    transport.send(credentials.clone()).await?;
    let mut challenged = false;
    loop {
        let payload = transport.recv().await?.ok_or(TransportError::Closed)?;
        match codec.decode(&payload)? {
            Frame::Terminal {
                request_id: id,
                status,
                ..
            } if id == request_id => {
                if status.is_success() {
                    debug!(principal = %config.principal, "authenticated");
                    return Ok(());
                }
                // Servers that expect a request before credentials answer with
                // a challenge; credentials are resent once under the same id.
                if status.code == AUTHENTICATE && !challenged {
                    debug!("authentication challenge received");
                    challenged = true;
                    transport.send(credentials.clone()).await?;
                    continue;
                }
                return Err(TransportError::Authentication {
                    code: status.code,
                    message: status.message,
                });
            }
            other => {
                debug!(request_id = %other.request_id(), "ignoring frame during handshake");
            }
        }
    }
}

struct ConnectionWorker<T> {
    endpoint: String,
    transport: T,
    codec: Arc<dyn FrameCodec>,
    dispatch: Arc<DispatchTable>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl<T: Transport> ConnectionWorker<T> {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn run(mut self) {
        let reason = loop {
            tokio::select! {
                outbound = self.outbound.recv() => match outbound {
                    Some(Outbound::Request(request)) => {
                        if let Err(err) = self.transmit(request).await {
                            break err.to_string();
                        }
                    }
                    Some(Outbound::Shutdown(ack)) => {
                        self.stop().await;
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        debug!("connection handle dropped");
                        self.stop().await;
                        return;
                    }
                },
                inbound = self.transport.recv() => match inbound {
                    Ok(Some(payload)) => {
                        if let Err(err) = self.receive(&payload) {
                            break err.to_string();
                        }
                    }
                    Ok(None) => break "server closed the connection".to_string(),
                    Err(err) => break err.to_string(),
                },
            }
        };

        let failed = self.dispatch.shutdown(Some(reason.clone()));
        warn!(%reason, failed, "connection lost");
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "failed to close transport after connection loss");
        }
    }

    async fn stop(&mut self) {
        let failed = self.dispatch.shutdown(None);
        if failed > 0 {
            info!(failed, "failed outstanding requests on close");
        }
        if let Err(err) = self.transport.close().await {
            warn!(error = %err, "failed to close transport cleanly");
        }
    }

    async fn transmit(&mut self, request: RequestMessage) -> Result<(), TransportError> {
        let request_id = request.request_id;
        let payload = match self.codec.encode(&request) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%request_id, error = %err, "failed to encode request");
                if let Some(pending) = self.dispatch.remove(&request_id) {
                    pending.fail(QueryError::Encode(err.to_string()));
                }
                return Ok(());
            }
        };
        trace!(%request_id, "transmitting request");
        self.transport.send(payload).await
    }

    fn receive(&self, payload: &str) -> Result<(), TransportError> {
        let frame = self.codec.decode(payload)?;
        let request_id = frame.request_id();
        match self.dispatch.deliver(frame) {
            Delivery::Appended => trace!(%request_id, "partial frame appended"),
            Delivery::Resolved => debug!(%request_id, "request resolved"),
            Delivery::Ignored => debug!(%request_id, "frame after resolution ignored"),
            Delivery::Unrouted => warn!(%request_id, "frame for unknown request dropped"),
        }
        Ok(())
    }
}
