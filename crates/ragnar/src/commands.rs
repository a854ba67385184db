use anyhow::{Context, Result};
use colored::*;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::corpus::Corpus;
use crate::error::RagError;
use crate::openai::OpenAiClient;
use crate::pipeline::RetrievalPipeline;
use crate::similarity::RankedResult;

pub const DEFAULT_QUERY: &str =
  "Which athletes won the gold medal in curling at the 2022 Winter Olympics?";

const BANNER_WIDTH: usize = 50;

/// Join positional words into the query, falling back to the stock question
pub fn query_text(words: &[String]) -> String {
  let joined = words.join(" ");
  if joined.trim().is_empty() {
    DEFAULT_QUERY.to_string()
  } else {
    joined
  }
}

/// Wire the OpenAI client into both collaborator seams
pub fn build_pipeline(settings: &Settings) -> Result<RetrievalPipeline> {
  let client_config = settings.client_config()?;
  let embedder = OpenAiClient::new(client_config.clone())?;
  let generator = OpenAiClient::new(client_config)?;

  Ok(RetrievalPipeline::new(Box::new(embedder), Box::new(generator), settings.pipeline.clone()))
}

pub fn load_corpus(settings: &Settings) -> Result<Corpus> {
  let corpus = Corpus::load(&settings.corpus)?;
  if corpus.is_empty() {
    tracing::warn!("Corpus {} has no records", settings.corpus.display());
  }
  Ok(corpus)
}

/// Parse the corpus on the blocking pool so an interrupt is not stuck behind it
pub async fn load_corpus_interruptible(
  settings: &Settings,
  cancel: &CancellationToken,
) -> Result<Corpus> {
  let settings = settings.clone();
  let loading = tokio::task::spawn_blocking(move || load_corpus(&settings));

  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(RagError::cancelled("corpus load").into()),
    joined = loading => joined.context("Corpus loading task failed")?,
  }
}

/// Answer a question using the ranked corpus as grounding context
pub async fn ask(
  settings: &Settings,
  query: &str,
  show_context: bool,
  cancel: &CancellationToken,
) -> Result<()> {
  let pipeline = build_pipeline(settings)?;
  let corpus = load_corpus_interruptible(settings, cancel).await?;

  let answer = pipeline
    .answer(query, &corpus, cancel)
    .await
    .with_context(|| format!("Failed to answer '{query}'"))?;

  if show_context {
    println!("{}", bentley::banner("Context", BANNER_WIDTH));
    println!("{}", render_results(&answer.context));
    println!("{}", bentley::banner("Answer", BANNER_WIDTH));
  }

  println!("{}", answer.text.trim_end());
  Ok(())
}

/// Rank the corpus against a question without generating an answer
pub async fn search(
  settings: &Settings,
  query: &str,
  json: bool,
  cancel: &CancellationToken,
) -> Result<()> {
  let pipeline = build_pipeline(settings)?;
  let corpus = load_corpus_interruptible(settings, cancel).await?;

  let results = pipeline
    .search(query, &corpus, cancel)
    .await
    .with_context(|| format!("Failed to search for '{query}'"))?;

  if json {
    println!("{}", serde_json::to_string_pretty(&results)?);
  } else if results.is_empty() {
    println!("No matches found for: {}", query.yellow());
  } else {
    println!("{}", render_results(&results));
  }

  Ok(())
}

/// Decode the corpus offline and report its shape
pub fn inspect(settings: &Settings) -> Result<()> {
  let corpus = load_corpus(settings)?;
  println!("{}", render_inspection(&corpus));
  Ok(())
}

pub fn render_results(results: &[RankedResult<'_>]) -> String {
  results
    .iter()
    .enumerate()
    .map(|(index, result)| {
      format!(
        "{:>3}. {} {}",
        index + 1,
        format!("[{:.4}]", result.similarity_score).cyan(),
        result.record.text
      )
    })
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn render_inspection(corpus: &Corpus) -> String {
  let decoded = corpus.decoded();
  let mut lines = vec![
    format!("{} {}", "Records:".bold(), corpus.len()),
    format!("{} {}", "Decoded:".bold(), decoded.vectors.len()),
    format!("{} {}", "Dropped:".bold(), decoded.dropped),
  ];

  for (dimension, count) in decoded.dimensions() {
    lines.push(format!("  {} {} vectors of dimension {}", "•".blue(), count, dimension));
  }

  if decoded.dimensions().len() > 1 {
    lines.push(format!("{} corpus mixes vector dimensions", "[WARN]".yellow()));
  }

  lines.join("\n")
}
