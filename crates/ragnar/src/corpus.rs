//! Corpus loading and the decoded-vector side table.

use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::codec;
use crate::error::{RagError, Result};

pub const TEXT_COLUMN: &str = "text";
pub const EMBEDDING_COLUMN: &str = "embedding";
/// Field the ranker attaches next to the record's own columns
pub const SCORE_COLUMN: &str = "similarity_score";

const RESERVED_COLUMNS: [&str; 3] = [TEXT_COLUMN, EMBEDDING_COLUMN, SCORE_COLUMN];

/// One row of the corpus file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusRecord {
  pub text: String,
  /// Serialized vector exactly as it appears in the file
  #[serde(skip_serializing)]
  pub embedding: String,
  /// Every other column, passed through untouched
  #[serde(flatten)]
  pub metadata: BTreeMap<String, String>,
}

impl CorpusRecord {
  pub fn new(text: impl Into<String>, embedding: impl Into<String>) -> Self {
    Self { text: text.into(), embedding: embedding.into(), metadata: BTreeMap::new() }
  }

  pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.metadata.insert(key.into(), value.into());
    self
  }
}

/// Vectors that survived decoding, keyed by record position
#[derive(Debug, Default)]
pub struct DecodedCorpus {
  pub vectors: Vec<(usize, Vec<f32>)>,
  pub dropped: usize,
}

impl DecodedCorpus {
  /// Count of decoded vectors per dimensionality
  pub fn dimensions(&self) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for (_, vector) in &self.vectors {
      *counts.entry(vector.len()).or_insert(0) += 1;
    }
    counts
  }
}

/// Read-only collection of records, loaded once per run
#[derive(Debug, Default)]
pub struct Corpus {
  records: Vec<CorpusRecord>,
  decoded: OnceCell<DecodedCorpus>,
}

impl Corpus {
  pub fn from_records(records: Vec<CorpusRecord>) -> Self {
    Self { records, decoded: OnceCell::new() }
  }

  /// Load a CSV corpus with at least `text` and `embedding` columns
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| RagError::corpus_load(path, e.to_string()))?;
    let records = read_records(file).map_err(|message| RagError::corpus_load(path, message))?;

    tracing::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(Self::from_records(records))
  }

  pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
    let records =
      read_records(reader).map_err(|message| RagError::corpus_load("<reader>", message))?;
    Ok(Self::from_records(records))
  }

  pub fn records(&self) -> &[CorpusRecord] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Decode every record's vector, once; malformed records are logged and skipped
  pub fn decoded(&self) -> &DecodedCorpus {
    self.decoded.get_or_init(|| decode_all(&self.records))
  }

  /// Records with a usable vector, in corpus order
  pub fn scorable(&self) -> impl Iterator<Item = (&CorpusRecord, &[f32])> + '_ {
    self.decoded().vectors.iter().map(|(index, vector)| (&self.records[*index], vector.as_slice()))
  }
}

fn decode_all(records: &[CorpusRecord]) -> DecodedCorpus {
  let mut decoded = DecodedCorpus::default();

  for (index, record) in records.iter().enumerate() {
    match codec::decode(&record.embedding) {
      Ok(vector) => decoded.vectors.push((index, vector)),
      Err(e) => {
        tracing::warn!(row = index, "Dropping record from ranking: {e}");
        decoded.dropped += 1;
      }
    }
  }

  tracing::debug!(
    "Decoded {} of {} corpus vectors ({} dropped)",
    decoded.vectors.len(),
    records.len(),
    decoded.dropped
  );
  decoded
}

fn read_records<R: Read>(reader: R) -> std::result::Result<Vec<CorpusRecord>, String> {
  let mut rows = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

  let headers = rows.headers().map_err(|e| format!("unreadable header: {e}"))?.clone();
  let text_idx = column_index(&headers, TEXT_COLUMN)?;
  let embedding_idx = column_index(&headers, EMBEDDING_COLUMN)?;
  let metadata_columns = metadata_columns(&headers, &[text_idx, embedding_idx])?;

  let mut records = Vec::new();
  for (row, result) in rows.records().enumerate() {
    let fields = result.map_err(|e| format!("row {}: {e}", row + 1))?;

    let mut record = CorpusRecord::new(
      fields.get(text_idx).unwrap_or_default(),
      fields.get(embedding_idx).unwrap_or_default(),
    );

    for (idx, name) in &metadata_columns {
      record.metadata.insert(name.clone(), fields.get(*idx).unwrap_or_default().to_string());
    }

    records.push(record);
  }

  Ok(records)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> std::result::Result<usize, String> {
  headers
    .iter()
    .position(|header| header.trim() == name)
    .ok_or_else(|| format!("missing required column '{name}'"))
}

/// Passthrough columns by position; their names must not collide with the
/// fields every ranked result already carries, nor with each other
fn metadata_columns(
  headers: &csv::StringRecord,
  required: &[usize],
) -> std::result::Result<Vec<(usize, String)>, String> {
  let mut columns: Vec<(usize, String)> = Vec::new();

  for (idx, name) in headers.iter().enumerate() {
    let name = name.trim();
    // pandas exports an unnamed index column first
    if required.contains(&idx) || name.is_empty() {
      continue;
    }
    if RESERVED_COLUMNS.contains(&name) {
      return Err(format!("column '{name}' (position {}) uses a reserved name", idx + 1));
    }
    if columns.iter().any(|(_, seen)| seen == name) {
      return Err(format!("duplicate column '{name}'"));
    }
    columns.push((idx, name.to_string()));
  }

  Ok(columns)
}
