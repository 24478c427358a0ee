//! In-flight request state and the caller-facing result handle.
//!
//! The connection's receive path owns a [`PendingRequest`] and mutates it as
//! frames arrive; the caller holds a [`ResultHandle`] observing the same state
//! through a `watch` channel. Resolution is single-shot: once a terminal frame
//! (or a transport failure) resolves the request, later frames are ignored.

use futures::stream::{self, Stream};
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{ProtocolError, QueryError};
use crate::protocol::{Frame, Query, RequestId, StatusAttributes};

#[derive(Debug, Clone)]
pub enum Resolution {
    Pending,
    Succeeded,
    Failed(QueryError),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Pending)
    }
}

/// Accumulated records plus resolution state of one request.
#[derive(Debug)]
pub struct PendingState {
    records: Vec<Value>,
    resolution: Resolution,
    attributes: Option<StatusAttributes>,
}

impl PendingState {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
            resolution: Resolution::Pending,
            attributes: None,
        }
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Terminal status attributes; `None` until resolved.
    pub fn status_attributes(&self) -> Option<&StatusAttributes> {
        self.attributes.as_ref()
    }

    /// Apply one frame. Returns `false` if the request was already resolved.
    pub(crate) fn apply(&mut self, frame: Frame) -> bool {
        if self.is_resolved() {
            return false;
        }
        match frame {
            Frame::Partial { records, .. } => {
                self.records.extend(records);
            }
            Frame::Terminal {
                request_id,
                records,
                status,
            } => {
                if status.is_success() {
                    self.records.extend(records);
                    self.attributes = Some(status.attributes);
                    self.resolution = Resolution::Succeeded;
                } else {
                    let err = ProtocolError::from_status(request_id, status);
                    self.attributes = Some(err.attributes.clone());
                    self.resolution = Resolution::Failed(QueryError::Protocol(err));
                }
            }
        }
        true
    }

    /// Resolve as failed without a terminal frame. No-op once resolved.
    pub(crate) fn fail(&mut self, error: QueryError) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.attributes = Some(StatusAttributes::new());
        self.resolution = Resolution::Failed(error);
        true
    }
}

/// Receive-side half of a submitted request, held in the dispatch table.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    request_id: RequestId,
    state: watch::Sender<PendingState>,
}

impl PendingRequest {
    pub(crate) fn new(request_id: RequestId, query: Query) -> (Self, ResultHandle) {
        let (tx, rx) = watch::channel(PendingState::new());
        let handle = ResultHandle {
            request_id,
            query,
            state: rx,
            cursor: 0,
            finished: false,
        };
        (
            Self {
                request_id,
                state: tx,
            },
            handle,
        )
    }

    pub(crate) fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub(crate) fn apply(&self, frame: Frame) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            applied = state.apply(frame);
            applied
        });
        applied
    }

    pub(crate) fn fail(&self, error: QueryError) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            applied = state.fail(error);
            applied
        });
        applied
    }
}

/// Caller-side view of a submitted query.
///
/// `await_all` waits for the terminal frame and returns every record;
/// `next_record` / `into_stream` yield records as partial frames arrive.
#[derive(Debug)]
pub struct ResultHandle {
    request_id: RequestId,
    query: Query,
    state: watch::Receiver<PendingState>,
    cursor: usize,
    finished: bool,
}

impl ResultHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_resolved(&self) -> bool {
        self.state.borrow().is_resolved()
    }

    /// Number of records received so far.
    pub fn received(&self) -> usize {
        self.state.borrow().records().len()
    }

    /// Terminal status attributes, or `None` while the request is pending.
    pub fn status_attributes(&self) -> Option<StatusAttributes> {
        self.state.borrow().status_attributes().cloned()
    }

    /// Wait for resolution and return all records in arrival order.
    pub async fn await_all(&mut self) -> Result<Vec<Value>, QueryError> {
        let state = self
            .state
            .wait_for(PendingState::is_resolved)
            .await
            .map_err(|_| dropped_error())?;
        match state.resolution() {
            Resolution::Succeeded => Ok(state.records().to_vec()),
            Resolution::Failed(err) => Err(err.clone()),
            Resolution::Pending => Err(dropped_error()),
        }
    }

    /// Next record in arrival order. A failed request yields its error once,
    /// then `None`.
    pub async fn next_record(&mut self) -> Option<Result<Value, QueryError>> {
        if self.finished {
            return None;
        }
        let cursor = self.cursor;
        let state = match self
            .state
            .wait_for(|state| state.records().len() > cursor || state.is_resolved())
            .await
        {
            Ok(state) => state,
            Err(_) => {
                self.finished = true;
                return Some(Err(dropped_error()));
            }
        };
        if let Some(record) = state.records().get(cursor) {
            let record = record.clone();
            drop(state);
            self.cursor += 1;
            trace!(request_id = %self.request_id, index = cursor, "yielding record");
            return Some(Ok(record));
        }
        let outcome = match state.resolution() {
            Resolution::Failed(err) => Some(Err(err.clone())),
            _ => None,
        };
        drop(state);
        self.finished = true;
        outcome
    }

    /// Consume the handle as a stream of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value, QueryError>> {
        stream::unfold(self, |mut handle| async move {
            handle.next_record().await.map(|item| (item, handle))
        })
    }
}

fn dropped_error() -> QueryError {
    QueryError::Transport("request dropped before resolution".to_string())
}
