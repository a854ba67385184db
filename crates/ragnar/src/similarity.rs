use serde::Serialize;
use std::cmp::Ordering;
use std::num::NonZeroUsize;

use crate::corpus::CorpusRecord;
use crate::error::{RagError, Result};

/// A corpus record with its similarity to the query attached
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult<'a> {
  #[serde(flatten)]
  pub record: &'a CorpusRecord,
  pub similarity_score: f32,
}

/// What happened to the candidates offered to [`top_k`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RankStats {
  pub scored: usize,
  pub mismatched: usize,
  pub degenerate: usize,
}

/// Calculate cosine similarity between two vectors.
///
/// Vectors of different length are a `DimensionMismatch`; a zero-magnitude
/// vector on either side is `DegenerateVector` rather than a division by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
  if a.len() != b.len() {
    return Err(RagError::dimension_mismatch(a.len(), b.len()));
  }

  let mut dot = 0.0f64;
  let mut norm_a = 0.0f64;
  let mut norm_b = 0.0f64;
  for (&x, &y) in a.iter().zip(b) {
    let (x, y) = (f64::from(x), f64::from(y));
    dot += x * y;
    norm_a += x * x;
    norm_b += y * y;
  }

  if norm_a == 0.0 || norm_b == 0.0 {
    return Err(RagError::DegenerateVector);
  }

  let score = dot / (norm_a.sqrt() * norm_b.sqrt());
  Ok(score.clamp(-1.0, 1.0) as f32)
}

/// Score every candidate against the query and keep the `k` best, best first.
///
/// Candidates that cannot be scored (wrong dimension, zero magnitude) are
/// skipped and do not count toward `k`. Equal scores keep corpus order.
pub fn top_k<'a, I>(
  query: &[f32],
  candidates: I,
  k: NonZeroUsize,
) -> (Vec<RankedResult<'a>>, RankStats)
where
  I: IntoIterator<Item = (&'a CorpusRecord, &'a [f32])>,
{
  let mut stats = RankStats::default();
  let mut results = Vec::new();

  for (position, (record, vector)) in candidates.into_iter().enumerate() {
    match cosine_similarity(query, vector) {
      Ok(similarity_score) => results.push(RankedResult { record, similarity_score }),
      Err(RagError::DimensionMismatch { expected, got }) => {
        tracing::debug!(
          candidate = position,
          "Skipping vector of length {got}, query has {expected}"
        );
        stats.mismatched += 1;
      }
      Err(e) => {
        tracing::debug!(candidate = position, "Skipping unscorable vector: {e}");
        stats.degenerate += 1;
      }
    }
  }

  stats.scored = results.len();

  // sort_by is stable, so ties stay in corpus order
  results.sort_by(|a, b| descending(a.similarity_score, b.similarity_score));
  results.truncate(k.get());

  (results, stats)
}

fn descending(a: f32, b: f32) -> Ordering {
  b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
