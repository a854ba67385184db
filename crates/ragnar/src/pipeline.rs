//! Embed, decode, rank, then compose and generate.

use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::corpus::Corpus;
use crate::error::{RagError, Result};
use crate::openai::{
  EmbeddingProvider, EmbeddingRequest, GenerationProvider, GenerationRequest, SamplingParams,
};
use crate::prompt::{self, DEFAULT_FRAMING, DEFAULT_SYSTEM_MESSAGE};
use crate::similarity::{self, RankedResult};

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
  pub embedding_model: String,
  pub generation_model: String,
  pub top_k: NonZeroUsize,
  /// Applied to each network call separately
  pub timeout: Duration,
  pub sampling: SamplingParams,
  /// Prompt framing; `{query}` is replaced with the user's text
  pub framing: String,
  pub system_message: String,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
      generation_model: DEFAULT_GENERATION_MODEL.to_string(),
      top_k: NonZeroUsize::new(DEFAULT_TOP_K).unwrap_or(NonZeroUsize::MIN),
      timeout: Duration::from_secs(60),
      sampling: SamplingParams::default(),
      framing: DEFAULT_FRAMING.to_string(),
      system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
    }
  }
}

/// A user question together with its freshly computed embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  pub text: String,
  pub embedding: Vec<f32>,
}

/// Everything produced while answering one query
#[derive(Debug)]
pub struct Answer<'a> {
  pub query: Query,
  pub context: Vec<RankedResult<'a>>,
  pub prompt: String,
  pub text: String,
}

enum Interrupted {
  Cancelled,
  TimedOut,
}

/// Run a collaborator call under the stage timeout and the caller's token
async fn guarded<T, F>(
  call: F,
  limit: Duration,
  cancel: &CancellationToken,
) -> std::result::Result<T, Interrupted>
where
  F: Future<Output = T>,
{
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(Interrupted::Cancelled),
    outcome = tokio::time::timeout(limit, call) => outcome.map_err(|_| Interrupted::TimedOut),
  }
}

pub struct RetrievalPipeline {
  embedder: Box<dyn EmbeddingProvider>,
  generator: Box<dyn GenerationProvider>,
  settings: PipelineSettings,
}

impl RetrievalPipeline {
  pub fn new(
    embedder: Box<dyn EmbeddingProvider>,
    generator: Box<dyn GenerationProvider>,
    settings: PipelineSettings,
  ) -> Self {
    Self { embedder, generator, settings }
  }

  pub fn settings(&self) -> &PipelineSettings {
    &self.settings
  }

  /// Stage 1: ask the embedding collaborator for the query vector
  pub async fn embed_query(&self, text: &str, cancel: &CancellationToken) -> Result<Query> {
    let request =
      EmbeddingRequest { model: self.settings.embedding_model.clone(), input: text.to_string() };

    let call = self.embedder.embed(&request);
    let embedding = match guarded(call, self.settings.timeout, cancel).await {
      Ok(result) => result?,
      Err(Interrupted::Cancelled) => return Err(RagError::cancelled("embedding")),
      Err(Interrupted::TimedOut) => {
        return Err(RagError::embedding_service(
          text,
          format!("timed out after {}s", self.settings.timeout.as_secs_f32()),
        ))
      }
    };

    validate_query_embedding(text, &embedding)?;
    tracing::info!("Embedded query into {} dimensions", embedding.len());

    Ok(Query { text: text.to_string(), embedding })
  }

  /// Stages 2 and 3: decode the corpus (cached) and rank it against the query
  pub fn retrieve<'a>(&self, query: &Query, corpus: &'a Corpus) -> Result<Vec<RankedResult<'a>>> {
    let (results, stats) =
      similarity::top_k(&query.embedding, corpus.scorable(), self.settings.top_k);

    if stats.mismatched > 0 {
      tracing::warn!(
        "{} records excluded: vector length differs from the query's {}",
        stats.mismatched,
        query.embedding.len()
      );
    }

    // Nothing matched the query's dimensionality: the corpus was embedded with another model
    if stats.scored == 0 && stats.mismatched > 0 {
      let got = corpus
        .scorable()
        .map(|(_, vector)| vector.len())
        .find(|&len| len != query.embedding.len())
        .unwrap_or_default();
      return Err(RagError::dimension_mismatch(query.embedding.len(), got));
    }

    tracing::info!("Selected {} of {} scorable records", results.len(), stats.scored);
    Ok(results)
  }

  /// Stage 4b: send the composed prompt to the generation collaborator
  pub async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
    let request = GenerationRequest {
      model: self.settings.generation_model.clone(),
      messages: prompt::compose_messages(&self.settings.system_message, prompt),
      sampling: self.settings.sampling.clone(),
    };

    match guarded(self.generator.generate(&request), self.settings.timeout, cancel).await {
      Ok(result) => result,
      Err(Interrupted::Cancelled) => Err(RagError::cancelled("generation")),
      Err(Interrupted::TimedOut) => Err(RagError::generation_service(
        prompt,
        format!("timed out after {}s", self.settings.timeout.as_secs_f32()),
      )),
    }
  }

  /// Retrieval only: embed the query and return the ranked context
  pub async fn search<'a>(
    &self,
    text: &str,
    corpus: &'a Corpus,
    cancel: &CancellationToken,
  ) -> Result<Vec<RankedResult<'a>>> {
    let query = self.embed_query(text, cancel).await?;
    self.retrieve(&query, corpus)
  }

  /// The full pipeline
  pub async fn answer<'a>(
    &self,
    text: &str,
    corpus: &'a Corpus,
    cancel: &CancellationToken,
  ) -> Result<Answer<'a>> {
    let query = self.embed_query(text, cancel).await?;
    let context = self.retrieve(&query, corpus)?;

    if cancel.is_cancelled() {
      return Err(RagError::cancelled("ranking"));
    }

    let prompt = prompt::compose_prompt(&self.settings.framing, &query.text, &context);
    tracing::debug!("Prompt:\n{prompt}");

    let text = self.generate(&prompt, cancel).await?;
    Ok(Answer { query, context, prompt, text })
  }
}

fn validate_query_embedding(text: &str, embedding: &[f32]) -> Result<()> {
  if embedding.is_empty() {
    return Err(RagError::embedding_service(text, "service returned an empty embedding"));
  }

  if embedding.iter().any(|v| !v.is_finite()) {
    return Err(RagError::embedding_service(text, "service returned non-finite components"));
  }

  if embedding.iter().all(|v| *v == 0.0) {
    return Err(RagError::DegenerateVector);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::corpus::CorpusRecord;
  use crate::openai::{MockEmbeddingProvider, MockGenerationProvider};
  use async_trait::async_trait;

  fn corpus() -> Corpus {
    Corpus::from_records(vec![
      CorpusRecord::new("record1", "[1,0]"),
      CorpusRecord::new("record2", "[0,1]"),
      CorpusRecord::new("record3", "[0.9,0.1]"),
    ])
  }

  fn embedder_returning(vector: Vec<f32>) -> MockEmbeddingProvider {
    let mut embedder = MockEmbeddingProvider::new();
    embedder.expect_embed().returning(move |_| Ok(vector.clone()));
    embedder
  }

  fn settings_with_k(k: usize) -> PipelineSettings {
    PipelineSettings { top_k: NonZeroUsize::new(k).unwrap(), ..PipelineSettings::default() }
  }

  #[tokio::test]
  async fn test_answer_runs_every_stage_in_order() {
    let mut embedder = MockEmbeddingProvider::new();
    embedder
      .expect_embed()
      .withf(|req| req.model == "text-embedding-ada-002" && req.input == "Who won?")
      .times(1)
      .returning(|_| Ok(vec![1.0, 0.0]));

    let mut generator = MockGenerationProvider::new();
    generator
      .expect_generate()
      .withf(|req| {
        req.model == "gpt-4"
          && req.sampling == SamplingParams::default()
          && req.messages[0].content == "You are a helpful assistant."
          && req.prompt().contains("A user asks you about: Who won?\n")
          && req.prompt().ends_with("1. record1 \n2. record3 \n")
      })
      .times(1)
      .returning(|_| Ok("Sweden".to_string()));

    let pipeline =
      RetrievalPipeline::new(Box::new(embedder), Box::new(generator), settings_with_k(2));
    let corpus = corpus();

    let answer = pipeline.answer("Who won?", &corpus, &CancellationToken::new()).await.unwrap();

    assert_eq!(answer.text, "Sweden");
    assert_eq!(answer.query.text, "Who won?");
    assert_eq!(answer.query.embedding, vec![1.0, 0.0]);
    assert_eq!(answer.context.len(), 2);
  }

  #[tokio::test]
  async fn test_embedding_failure_stops_before_generation() {
    let mut embedder = MockEmbeddingProvider::new();
    embedder
      .expect_embed()
      .returning(|req| Err(RagError::embedding_service(&req.input, "HTTP 500")));

    let mut generator = MockGenerationProvider::new();
    generator.expect_generate().times(0);

    let pipeline =
      RetrievalPipeline::new(Box::new(embedder), Box::new(generator), PipelineSettings::default());
    let corpus = corpus();

    let err = pipeline.answer("q", &corpus, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { ref input, .. } if input == "q"));
  }

  #[tokio::test]
  async fn test_generation_failure_propagates() {
    let mut generator = MockGenerationProvider::new();
    generator
      .expect_generate()
      .returning(|req| Err(RagError::generation_service(req.prompt(), "HTTP 429")));

    let pipeline = RetrievalPipeline::new(
      Box::new(embedder_returning(vec![1.0, 0.0])),
      Box::new(generator),
      PipelineSettings::default(),
    );
    let corpus = corpus();

    let err = pipeline.answer("q", &corpus, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RagError::GenerationService { .. }));
  }

  #[tokio::test]
  async fn test_cancelled_token_short_circuits() {
    let mut generator = MockGenerationProvider::new();
    generator.expect_generate().times(0);

    let pipeline = RetrievalPipeline::new(
      Box::new(embedder_returning(vec![1.0, 0.0])),
      Box::new(generator),
      PipelineSettings::default(),
    );
    let corpus = corpus();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline.answer("q", &corpus, &cancel).await.unwrap_err();
    assert!(matches!(err, RagError::Cancelled { stage: "embedding" }));
  }

  struct StalledEmbedder;

  #[async_trait]
  impl EmbeddingProvider for StalledEmbedder {
    async fn embed(&self, _request: &EmbeddingRequest) -> Result<Vec<f32>> {
      tokio::time::sleep(Duration::from_secs(30)).await;
      Ok(vec![1.0])
    }
  }

  #[tokio::test]
  async fn test_slow_embedding_times_out() {
    let settings =
      PipelineSettings { timeout: Duration::from_millis(20), ..PipelineSettings::default() };
    let generator = MockGenerationProvider::new();
    let pipeline = RetrievalPipeline::new(Box::new(StalledEmbedder), Box::new(generator), settings);

    let err = pipeline.embed_query("q", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
      err,
      RagError::EmbeddingService { ref message, .. } if message.contains("timed out")
    ));
  }

  #[tokio::test]
  async fn test_degenerate_and_empty_query_embeddings_are_rejected() {
    let pipeline = RetrievalPipeline::new(
      Box::new(embedder_returning(vec![0.0, 0.0])),
      Box::new(MockGenerationProvider::new()),
      PipelineSettings::default(),
    );
    let err = pipeline.embed_query("q", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RagError::DegenerateVector));

    let pipeline = RetrievalPipeline::new(
      Box::new(embedder_returning(vec![])),
      Box::new(MockGenerationProvider::new()),
      PipelineSettings::default(),
    );
    let err = pipeline.embed_query("q", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { .. }));
  }

  #[test]
  fn test_isolated_dimension_mismatch_is_excluded() {
    let pipeline = RetrievalPipeline::new(
      Box::new(MockEmbeddingProvider::new()),
      Box::new(MockGenerationProvider::new()),
      PipelineSettings::default(),
    );
    let corpus = Corpus::from_records(vec![
      CorpusRecord::new("short", "[1,0]"),
      CorpusRecord::new("match", "[1,0,0]"),
    ]);
    let query = Query { text: "q".to_string(), embedding: vec![1.0, 0.0, 0.0] };

    let results = pipeline.retrieve(&query, &corpus).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.text, "match");
  }

  #[test]
  fn test_wholesale_dimension_mismatch_is_fatal() {
    let pipeline = RetrievalPipeline::new(
      Box::new(MockEmbeddingProvider::new()),
      Box::new(MockGenerationProvider::new()),
      PipelineSettings::default(),
    );
    let corpus = corpus();
    let query = Query { text: "q".to_string(), embedding: vec![1.0, 0.0, 0.0] };

    let err = pipeline.retrieve(&query, &corpus).unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 3, got: 2 }));
  }

  #[test]
  fn test_empty_corpus_yields_empty_context() {
    let pipeline = RetrievalPipeline::new(
      Box::new(MockEmbeddingProvider::new()),
      Box::new(MockGenerationProvider::new()),
      PipelineSettings::default(),
    );
    let corpus = Corpus::from_records(vec![]);
    let query = Query { text: "q".to_string(), embedding: vec![1.0] };

    assert!(pipeline.retrieve(&query, &corpus).unwrap().is_empty());
  }
}
