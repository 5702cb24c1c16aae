//! Response encoding
//!
//! Reads are streamed: features are pulled from the cursor and encoded into
//! chunks of roughly [`CHUNK_SIZE`] bytes, so memory use does not depend on
//! the number of rows.

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use serde::Serialize;
use tracing::warn;

use featureserver_common::error::Result;
use featureserver_common::types::{ColumnDescriptor, TableDescriptor, Value};
use featureserver_dbase::{FeatureRecord, ReadResult};

use crate::params::OutputFormat;

/// Target size of a streamed chunk
pub const CHUNK_SIZE: usize = 16 * 1024;

/// `GET /rest/tables` body
#[derive(Debug, Serialize)]
pub struct TableListing {
    pub total: usize,
    pub items: Vec<TableItem>,
}

#[derive(Debug, Serialize)]
pub struct TableItem {
    pub name: String,
    pub id: Option<String>,
    pub geometry: Option<String>,
    pub properties: Vec<ColumnDescriptor>,
}

impl From<&TableDescriptor> for TableItem {
    fn from(table: &TableDescriptor) -> Self {
        Self {
            name: table.name.clone(),
            id: table.id.as_ref().map(|c| c.name.clone()),
            geometry: table.geometry.clone(),
            properties: table.columns(),
        }
    }
}

/// `GET /rest/tables/{name}/{property}` body
#[derive(Debug, Serialize)]
pub struct DistinctValues<'a> {
    pub table: &'a str,
    pub property: &'a str,
    #[serde(rename = "distinct-values")]
    pub values: &'a [Value],
}

/// Render a value for CSV; the separator and line breaks become spaces
pub fn csv_field(value: &Value, separator: char) -> String {
    value
        .to_string()
        .chars()
        .map(|c| {
            if c == separator || c == '\n' || c == '\r' {
                ' '
            } else {
                c
            }
        })
        .collect()
}

fn csv_join(fields: impl Iterator<Item = String>, separator: char) -> String {
    let mut line = fields.collect::<Vec<_>>().join(&separator.to_string());
    line.push('\n');
    line
}

/// Header line: the projected column names
pub fn csv_header(names: &[String], separator: char) -> String {
    csv_join(
        names.iter().map(|n| csv_field(&Value::Text(n.clone()), separator)),
        separator,
    )
}

pub fn csv_line(record: &FeatureRecord, separator: char) -> String {
    csv_join(
        record.values().iter().map(|v| csv_field(v, separator)),
        separator,
    )
}

/// Distinct values on a single line
pub fn distinct_csv(values: &[Value], separator: char) -> String {
    values
        .iter()
        .map(|v| csv_field(v, separator))
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

#[derive(Debug, Clone, Copy)]
enum Encoder {
    Json,
    Csv(char),
}

enum Stage {
    Start,
    Rows,
    Done,
}

struct FeatureStream {
    result: ReadResult,
    encoder: Encoder,
    stage: Stage,
    first: bool,
}

impl FeatureStream {
    fn prologue(&self, buf: &mut BytesMut) {
        match self.encoder {
            Encoder::Json => {
                buf.put_slice(format!("{{\"total\":{},\"items\":[", self.result.total_count()).as_bytes());
            }
            Encoder::Csv(separator) => {
                buf.put_slice(csv_header(self.result.projection().column_names(), separator).as_bytes());
            }
        }
    }

    fn epilogue(&self, buf: &mut BytesMut) {
        if let Encoder::Json = self.encoder {
            buf.put_slice(b"]}");
        }
    }

    fn encode(&mut self, record: &FeatureRecord, buf: &mut BytesMut) -> Result<()> {
        match self.encoder {
            Encoder::Json => {
                if !self.first {
                    buf.put_u8(b',');
                }
                serde_json::to_writer((&mut *buf).writer(), record)?;
            }
            Encoder::Csv(separator) => buf.put_slice(csv_line(record, separator).as_bytes()),
        }
        self.first = false;
        Ok(())
    }

    /// Fill the next chunk; `None` once the body is complete
    async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        match self.stage {
            Stage::Done => return None,
            Stage::Start => {
                self.prologue(&mut buf);
                self.stage = Stage::Rows;
            }
            Stage::Rows => {}
        }

        while buf.len() < CHUNK_SIZE {
            match self.result.next_feature().await {
                Ok(Some(record)) => {
                    if let Err(e) = self.encode(&record, &mut buf) {
                        return Some(self.fail(e).await);
                    }
                }
                Ok(None) => {
                    self.epilogue(&mut buf);
                    self.stage = Stage::Done;
                    break;
                }
                Err(e) => return Some(self.fail(e).await),
            }
        }
        Some(Ok(buf.freeze()))
    }

    async fn fail(&mut self, e: featureserver_common::Error) -> Result<Bytes> {
        warn!("Aborting streamed response: {}", e);
        self.stage = Stage::Done;
        if let Err(close_error) = self.result.close().await {
            warn!("Failed to close cursor: {}", close_error);
        }
        Err(e)
    }
}

/// Stream the body of a read in `format`
pub fn feature_stream(
    result: ReadResult,
    format: OutputFormat,
    separator: char,
) -> impl Stream<Item = Result<Bytes>> {
    let encoder = match format {
        OutputFormat::Json => Encoder::Json,
        OutputFormat::Csv => Encoder::Csv(separator),
    };
    let state = FeatureStream {
        result,
        encoder,
        stage: Stage::Start,
        first: true,
    };
    stream::unfold(state, |mut state| async move {
        let chunk = state.next_chunk().await?;
        Some((chunk, state))
    })
}
