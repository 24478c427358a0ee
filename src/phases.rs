//! The load phases and the console prompts between them.

use std::fmt;

use airgraph_client::{BulkLoader, GraphClient, LoadReport, QueryError, QueryResult};
use anyhow::{Context, Result};
use clap::ValueEnum;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{error, info};

use crate::config::LoaderConfig;
use crate::input::{read_rows, Airport, Route};
use crate::queries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Phase {
    /// Drop every vertex in the graph.
    Cleanup,
    /// Insert airports from the vertex file.
    Vertices,
    /// Insert routes from the edge file.
    Edges,
    /// Count the vertices.
    Count,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Cleanup, Phase::Vertices, Phase::Edges, Phase::Count];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Cleanup => "cleanup",
            Phase::Vertices => "vertices",
            Phase::Edges => "edges",
            Phase::Count => "count",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Phase::Cleanup => {
                "We're about to drop whatever graph is on the server. Press Enter to continue..."
            }
            Phase::Vertices => "Let's insert some vertices into the graph. Press Enter to continue...",
            Phase::Edges => {
                "Now, let's add some edges between the vertices. Press Enter to continue..."
            }
            Phase::Count => "Okay. Let's count how many vertices we have. Press Enter to continue...",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one phase.
#[derive(Debug)]
pub enum PhaseSummary {
    Single(QueryResult),
    Batch(LoadReport),
}

pub struct PhaseRunner<'a> {
    client: &'a GraphClient,
    config: &'a LoaderConfig,
}

impl<'a> PhaseRunner<'a> {
    pub fn new(client: &'a GraphClient, config: &'a LoaderConfig) -> Self {
        Self { client, config }
    }

    pub async fn run(&self, phase: Phase) -> Result<PhaseSummary> {
        info!(%phase, "starting phase");
        match phase {
            Phase::Cleanup => self.single(queries::CLEANUP).await,
            Phase::Count => self.single(queries::COUNT_VERTICES).await,
            Phase::Vertices => {
                let rows = read_rows(&self.config.vertices_path, self.config.has_header)?;
                let report = BulkLoader::new(self.client, phase.as_str())
                    .run(rows, |row| Airport::from_row(&row).map(|a| queries::add_airport(&a)))
                    .await
                    .context("vertex load aborted")?;
                Ok(PhaseSummary::Batch(report))
            }
            Phase::Edges => {
                let rows = read_rows(&self.config.edges_path, self.config.has_header)?;
                let report = BulkLoader::new(self.client, phase.as_str())
                    .run(rows, |row| Route::from_row(&row).map(|r| queries::add_route(&r)))
                    .await
                    .context("edge load aborted")?;
                Ok(PhaseSummary::Batch(report))
            }
        }
    }

    async fn single(&self, query: &str) -> Result<PhaseSummary> {
        let result = self
            .client
            .query(query)
            .await
            .inspect_err(|err| log_query_error(query, err))
            .with_context(|| format!("query failed: {query}"))?;
        info!(
            query,
            records = result.total_records,
            request_charge = ?result.request_charge(),
            "query complete"
        );
        Ok(PhaseSummary::Single(result))
    }
}

fn log_query_error(query: &str, err: &QueryError) {
    let attributes = err.status_attributes();
    error!(
        query,
        category = %err.category(),
        vendor_status_code = ?attributes.and_then(|a| a.vendor_status_code()),
        retry_after = ?attributes.and_then(|a| a.retry_after()),
        "query failed"
    );
}

/// Pauses for Enter between phases.
pub struct Prompter {
    editor: DefaultEditor,
}

impl Prompter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new().context("failed to initialize console")?,
        })
    }

    /// Returns `false` when the user pressed Ctrl-C or closed the input.
    pub fn confirm(&mut self, phase: Phase) -> Result<bool> {
        match self.editor.readline(&format!("{} ", phase.prompt())) {
            Ok(_) => Ok(true),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(false),
            Err(err) => Err(err).context("failed to read from console"),
        }
    }
}
