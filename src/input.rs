//! Air-routes CSV input.
//!
//! Both files are read with every column typed as `Utf8`; the positional
//! layout below is what the air-routes export uses.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use airgraph_client::MalformedRecord;
use anyhow::{anyhow, Context, Result};
use arrow_array::{Array, StringArray};
use arrow_csv::reader::Format;
use arrow_csv::ReaderBuilder;
use arrow_schema::{DataType, Field, Schema};
use tracing::debug;

const VERTEX_ID: usize = 0;
const VERTEX_CODE: usize = 3;
const VERTEX_ICAO: usize = 4;
const VERTEX_DESC: usize = 5;
const EDGE_SOURCE: usize = 1;
const EDGE_TARGET: usize = 2;

/// One CSV row, with empty cells as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    /// 1-based line in the source file.
    pub line: usize,
    pub fields: Vec<Option<String>>,
}

impl CsvRow {
    fn required(&self, index: usize, name: &str) -> Result<String, MalformedRecord> {
        match self.fields.get(index) {
            Some(Some(value)) if !value.trim().is_empty() => Ok(value.clone()),
            _ => Err(MalformedRecord::new(format!(
                "line {}: missing required field '{name}'",
                self.line
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Airport {
    pub id: String,
    pub code: String,
    pub icao: String,
    pub desc: String,
}

impl Airport {
    pub fn from_row(row: &CsvRow) -> Result<Self, MalformedRecord> {
        Ok(Self {
            id: row.required(VERTEX_ID, "id")?,
            code: row.required(VERTEX_CODE, "code")?,
            icao: row.required(VERTEX_ICAO, "icao")?,
            desc: row.required(VERTEX_DESC, "desc")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub source: String,
    pub target: String,
}

impl Route {
    pub fn from_row(row: &CsvRow) -> Result<Self, MalformedRecord> {
        Ok(Self {
            source: row.required(EDGE_SOURCE, "source")?,
            target: row.required(EDGE_TARGET, "target")?,
        })
    }
}

/// Read every row of `path` as strings.
///
/// The column count comes from the first line. Short rows are padded with
/// nulls so the record mapping reports them as malformed.
pub fn read_rows(path: &Path, has_header: bool) -> Result<Vec<CsvRow>> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let format = Format::default()
        .with_header(has_header)
        .with_truncated_rows(true);
    let (inferred, _) = format
        .infer_schema(&mut file, Some(0))
        .with_context(|| format!("failed to read CSV layout of {}", path.display()))?;
    if inferred.fields().is_empty() {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(0))?;

    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|field| Field::new(field.name(), DataType::Utf8, true))
        .collect();
    let reader = ReaderBuilder::new(Arc::new(Schema::new(fields)))
        .with_format(format)
        .build(file)
        .with_context(|| format!("failed to create CSV reader for {}", path.display()))?;

    let first_line = if has_header { 2 } else { 1 };
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("failed to parse {}", path.display()))?;
        let columns = batch
            .columns()
            .iter()
            .map(|column| {
                column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| anyhow!("CSV column was not read as Utf8"))
            })
            .collect::<Result<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            let fields = columns
                .iter()
                .map(|column| (!column.is_null(row)).then(|| column.value(row).to_string()))
                .collect();
            rows.push(CsvRow {
                line: first_line + rows.len(),
                fields,
            });
        }
    }
    debug!(path = %path.display(), rows = rows.len(), "read CSV input");
    Ok(rows)
}
