//! Text form of embedding vectors as stored in the corpus: `[f1,f2,...,fn]`.

use crate::error::{RagError, Result};

/// Parse a bracket-wrapped, comma-separated vector.
///
/// Every token must parse to a finite number; a single bad token rejects the
/// whole vector rather than letting NaN leak into similarity math.
pub fn decode(raw: &str) -> Result<Vec<f32>> {
  let trimmed = raw.trim();

  let inner = trimmed
    .strip_prefix('[')
    .and_then(|rest| rest.strip_suffix(']'))
    .ok_or_else(|| RagError::malformed_vector(raw, "expected a bracket-wrapped list"))?;

  if inner.trim().is_empty() {
    return Err(RagError::malformed_vector(raw, "vector is empty"));
  }

  inner
    .split(',')
    .enumerate()
    .map(|(position, token)| parse_component(raw, position, token.trim()))
    .collect()
}

fn parse_component(raw: &str, position: usize, token: &str) -> Result<f32> {
  let value: f32 = token.parse().map_err(|_| {
    RagError::malformed_vector(raw, format!("component {position} ('{token}') is not a number"))
  })?;

  if !value.is_finite() {
    return Err(RagError::malformed_vector(
      raw,
      format!("component {position} ('{token}') is not finite"),
    ));
  }

  Ok(value)
}

/// Inverse of [`decode`]
pub fn encode(vector: &[f32]) -> String {
  let components: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
  format!("[{}]", components.join(","))
}
