use std::path::Path;
use thiserror::Error;

/// Failures raised anywhere between the corpus file and the generated answer.
///
/// `MalformedVector`, `DimensionMismatch` and `DegenerateVector` are raised per
/// record and are absorbed at the record boundary during retrieval. Everything
/// else aborts the current query (or, for `CorpusLoad`, the whole run).
#[derive(Error, Debug)]
pub enum RagError {
  #[error("Malformed vector '{raw}': {reason}")]
  MalformedVector { raw: String, reason: String },

  #[error("Vector dimension mismatch: expected {expected}, got {got}")]
  DimensionMismatch { expected: usize, got: usize },

  #[error("Vector has zero magnitude")]
  DegenerateVector,

  #[error("Embedding request for '{input}' failed: {message}")]
  EmbeddingService { input: String, message: String },

  #[error("Generation request failed: {message}")]
  GenerationService { prompt: String, message: String },

  #[error("Failed to load corpus from {path}: {message}")]
  CorpusLoad { path: String, message: String },

  #[error("Cancelled during {stage}")]
  Cancelled { stage: &'static str },

  #[error("Invalid configuration: {message}")]
  Config { message: String },
}

impl RagError {
  pub fn malformed_vector(raw: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::MalformedVector { raw: raw.into(), reason: reason.into() }
  }

  pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
    Self::DimensionMismatch { expected, got }
  }

  pub fn embedding_service(input: impl Into<String>, message: impl Into<String>) -> Self {
    Self::EmbeddingService { input: input.into(), message: message.into() }
  }

  pub fn generation_service(prompt: impl Into<String>, message: impl Into<String>) -> Self {
    Self::GenerationService { prompt: prompt.into(), message: message.into() }
  }

  pub fn corpus_load(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
    Self::CorpusLoad { path: path.as_ref().display().to_string(), message: message.into() }
  }

  pub fn cancelled(stage: &'static str) -> Self {
    Self::Cancelled { stage }
  }

  pub fn config(message: impl Into<String>) -> Self {
    Self::Config { message: message.into() }
  }

  /// Per-record failures never abort a batch
  pub fn is_per_record(&self) -> bool {
    matches!(
      self,
      Self::MalformedVector { .. } | Self::DimensionMismatch { .. } | Self::DegenerateVector
    )
  }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
