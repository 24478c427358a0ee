//! Sequential bulk loading: one query per input record.
//!
//! Each query is awaited before the next one is submitted. A server-reported
//! failure or a query that cannot be encoded is logged and counted, a
//! malformed record is skipped, and losing the connection aborts the run with
//! the report accumulated so far.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::classify::ErrorCategory;
use crate::client::GraphClient;
use crate::error::{MalformedRecord, QueryError, TransportError};
use crate::protocol::{Query, StatusAttributes};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Loaded { records: usize },
    Failed(ErrorCategory),
    Malformed(String),
}

/// Result of loading one input record.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub index: usize,
    /// Query text, absent when the record could not be rendered.
    pub query: Option<String>,
    pub outcome: RecordOutcome,
    /// Request units reported on the terminal frame.
    pub request_charge: Option<f64>,
    pub server_time_ms: Option<f64>,
}

impl LoadOutcome {
    fn new(index: usize, query: Option<String>, outcome: RecordOutcome) -> Self {
        Self {
            index,
            query,
            outcome,
            request_charge: None,
            server_time_ms: None,
        }
    }

    fn with_attributes(mut self, attributes: Option<&StatusAttributes>) -> Self {
        if let Some(attributes) = attributes {
            self.request_charge = attributes
                .total_request_charge()
                .or_else(|| attributes.request_charge());
            self.server_time_ms = attributes
                .total_server_time_ms()
                .or_else(|| attributes.server_time_ms());
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub succeeded: usize,
    pub failed: usize,
    pub malformed: usize,
    /// Result records returned across all successful queries.
    pub loaded_records: usize,
    pub request_charge: f64,
    /// Server-side latency summed across all queries.
    pub server_time_ms: f64,
    pub failures_by_category: BTreeMap<ErrorCategory, usize>,
}

impl LoadReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.malformed
    }

    pub fn failures(&self, category: ErrorCategory) -> usize {
        self.failures_by_category
            .get(&category)
            .copied()
            .unwrap_or(0)
    }

    fn record(&mut self, outcome: &LoadOutcome) {
        match &outcome.outcome {
            RecordOutcome::Loaded { records } => {
                self.succeeded += 1;
                self.loaded_records += records;
            }
            RecordOutcome::Failed(category) => {
                self.failed += 1;
                *self.failures_by_category.entry(*category).or_insert(0) += 1;
            }
            RecordOutcome::Malformed(_) => self.malformed += 1,
        }
        self.request_charge += outcome.request_charge.unwrap_or(0.0);
        self.server_time_ms += outcome.server_time_ms.unwrap_or(0.0);
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("load aborted after {} records: {source}", .report.processed())]
    Aborted {
        report: LoadReport,
        #[source]
        source: TransportError,
    },
}

impl LoadError {
    pub fn report(&self) -> &LoadReport {
        match self {
            LoadError::Aborted { report, .. } => report,
        }
    }
}

/// Drives one phase of a bulk load through a [`GraphClient`].
pub struct BulkLoader<'a> {
    client: &'a GraphClient,
    phase: String,
}

impl<'a> BulkLoader<'a> {
    pub fn new(client: &'a GraphClient, phase: impl Into<String>) -> Self {
        Self {
            client,
            phase: phase.into(),
        }
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Load `records` in order, rendering each with `build`.
    #[instrument(skip_all, fields(phase = %self.phase))]
    pub async fn run<I, R, F>(&self, records: I, mut build: F) -> Result<LoadReport, LoadError>
    where
        I: IntoIterator<Item = R>,
        F: FnMut(R) -> Result<Query, MalformedRecord>,
    {
        let mut report = LoadReport::default();
        for (index, record) in records.into_iter().enumerate() {
            let query = match build(record) {
                Ok(query) => query,
                Err(err) => {
                    warn!(index, reason = %err.reason, "skipping malformed record");
                    let outcome =
                        LoadOutcome::new(index, None, RecordOutcome::Malformed(err.reason));
                    report.record(&outcome);
                    continue;
                }
            };

            match self.load_one(index, query).await {
                Ok(outcome) => report.record(&outcome),
                Err(source) => {
                    error!(index, error = %source, processed = report.processed(), "aborting load");
                    return Err(LoadError::Aborted { report, source });
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            malformed = report.malformed,
            request_charge = report.request_charge,
            server_time_ms = report.server_time_ms,
            "phase complete"
        );
        Ok(report)
    }

    async fn load_one(&self, index: usize, query: Query) -> Result<LoadOutcome, TransportError> {
        let text = query.text().to_string();
        let mut handle = self.client.submit(query)?;
        match handle.await_all().await {
            Ok(records) => {
                let outcome = LoadOutcome::new(
                    index,
                    Some(text),
                    RecordOutcome::Loaded {
                        records: records.len(),
                    },
                )
                .with_attributes(handle.status_attributes().as_ref());
                info!(
                    index,
                    records = records.len(),
                    request_charge = ?outcome.request_charge,
                    server_time_ms = ?outcome.server_time_ms,
                    "record loaded"
                );
                debug!(index, query = ?outcome.query, result = ?records, "loaded result");
                Ok(outcome)
            }
            Err(QueryError::Protocol(err)) => {
                warn!(
                    index,
                    query = %text,
                    category = %err.category,
                    status_code = err.status_code,
                    vendor_status_code = ?err.vendor_status_code,
                    retry_after = ?err.attributes.retry_after(),
                    message = %err.message,
                    "query failed"
                );
                Ok(
                    LoadOutcome::new(index, Some(text), RecordOutcome::Failed(err.category))
                        .with_attributes(Some(&err.attributes)),
                )
            }
            Err(QueryError::Encode(reason)) => {
                warn!(index, query = %text, %reason, "query could not be encoded");
                Ok(LoadOutcome::new(
                    index,
                    Some(text),
                    RecordOutcome::Failed(ErrorCategory::Unknown),
                ))
            }
            Err(QueryError::Transport(reason)) => Err(TransportError::Lost(reason)),
        }
    }
}
