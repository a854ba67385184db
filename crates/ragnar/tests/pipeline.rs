use async_trait::async_trait;
use ragnar::openai::{EmbeddingProvider, EmbeddingRequest, GenerationProvider, GenerationRequest};
use ragnar::{Corpus, PipelineSettings, RagError, Result, RetrievalPipeline};
use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

/// Embedding fake that always returns the same vector
struct FixedEmbedder {
  vector: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
  async fn embed(&self, _request: &EmbeddingRequest) -> Result<Vec<f32>> {
    Ok(self.vector.clone())
  }
}

/// Generation fake that records every request it sees
#[derive(Clone, Default)]
struct RecordingGenerator {
  requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
  async fn generate(&self, request: &GenerationRequest) -> Result<String> {
    self.requests.lock().unwrap().push(request.clone());
    Ok("generated answer".to_string())
  }
}

fn write_corpus(rows: &[(&str, &str)]) -> NamedTempFile {
  let mut file = NamedTempFile::new().unwrap();
  writeln!(file, "text,embedding,year").unwrap();
  for (text, embedding) in rows {
    writeln!(file, "\"{text}\",\"{embedding}\",2022").unwrap();
  }
  file.flush().unwrap();
  file
}

fn pipeline(query_vector: Vec<f32>, k: usize, generator: RecordingGenerator) -> RetrievalPipeline {
  let settings =
    PipelineSettings { top_k: NonZeroUsize::new(k).unwrap(), ..PipelineSettings::default() };
  let embedder = FixedEmbedder { vector: query_vector };
  RetrievalPipeline::new(Box::new(embedder), Box::new(generator), settings)
}

#[tokio::test]
async fn test_top_two_of_three_records() -> Result<()> {
  let file = write_corpus(&[("record1", "[1,0]"), ("record2", "[0,1]"), ("record3", "[0.9,0.1]")]);
  let corpus = Corpus::load(file.path())?;

  let results = pipeline(vec![1.0, 0.0], 2, RecordingGenerator::default())
    .search("q", &corpus, &CancellationToken::new())
    .await?;

  assert_eq!(results.len(), 2);
  assert_eq!(results[0].record.text, "record1");
  assert_eq!(results[0].similarity_score, 1.0);
  assert_eq!(results[1].record.text, "record3");
  assert!((results[1].similarity_score - 0.994).abs() < 1e-3);
  assert_eq!(results[0].record.metadata.get("year").map(String::as_str), Some("2022"));
  Ok(())
}

#[tokio::test]
async fn test_corrupt_row_is_dropped_and_the_rest_still_rank() -> Result<()> {
  let file = write_corpus(&[("good", "[1,0,0]"), ("corrupt", "[1,a,3]"), ("other", "[0,1,0]")]);
  let corpus = Corpus::load(file.path())?;

  let results = pipeline(vec![1.0, 0.0, 0.0], 10, RecordingGenerator::default())
    .search("q", &corpus, &CancellationToken::new())
    .await?;

  let texts: Vec<&str> = results.iter().map(|r| r.record.text.as_str()).collect();
  assert_eq!(texts, vec!["good", "other"]);
  assert_eq!(corpus.decoded().dropped, 1);
  Ok(())
}

#[tokio::test]
async fn test_shorter_corpus_vector_is_excluded_not_fatal() -> Result<()> {
  let file = write_corpus(&[("three", "[1,0,0]"), ("two", "[1,0]"), ("also three", "[0,0,1]")]);
  let corpus = Corpus::load(file.path())?;

  let results = pipeline(vec![1.0, 0.0, 0.0], 10, RecordingGenerator::default())
    .search("q", &corpus, &CancellationToken::new())
    .await?;

  assert_eq!(results.len(), 2);
  assert!(results.iter().all(|r| r.record.text != "two"));
  Ok(())
}

#[tokio::test]
async fn test_k_larger_than_corpus_returns_every_scorable_record() -> Result<()> {
  let file = write_corpus(&[("a", "[1,0]"), ("b", "[0,1]"), ("c", "[1,1]"), ("d", "[-1,0]")]);
  let corpus = Corpus::load(file.path())?;

  let results = pipeline(vec![1.0, 0.0], 10, RecordingGenerator::default())
    .search("q", &corpus, &CancellationToken::new())
    .await?;

  assert_eq!(results.len(), 4);
  assert!(results.windows(2).all(|w| w[0].similarity_score >= w[1].similarity_score));
  Ok(())
}

#[tokio::test]
async fn test_answer_prompt_uses_original_text_and_ranked_context() -> Result<()> {
  let file = write_corpus(&[
    ("Sweden won curling gold", "[1,0]"),
    ("Norway topped the medal table", "[0,1]"),
  ]);
  let corpus = Corpus::load(file.path())?;
  let generator = RecordingGenerator::default();

  let answer = pipeline(vec![1.0, 0.2], 10, generator.clone())
    .answer("Who won curling?", &corpus, &CancellationToken::new())
    .await?;

  assert_eq!(answer.text, "generated answer");

  let requests = generator.requests.lock().unwrap();
  assert_eq!(requests.len(), 1);
  let prompt = requests[0].prompt();
  assert!(prompt.contains("A user asks you about: Who won curling?\n"));
  assert!(prompt.ends_with("1. Sweden won curling gold \n2. Norway topped the medal table \n"));
  assert_eq!(prompt, answer.prompt);
  Ok(())
}

#[tokio::test]
async fn test_repeated_queries_share_one_decoded_corpus() -> Result<()> {
  let file = write_corpus(&[("a", "[0.3,0.7]"), ("b", "[0.7,0.3]"), ("c", "[0.7,0.3]")]);
  let corpus = Corpus::load(file.path())?;
  let pipeline = pipeline(vec![1.0, 0.0], 3, RecordingGenerator::default());
  let cancel = CancellationToken::new();

  let (first, second) =
    tokio::join!(pipeline.search("q1", &corpus, &cancel), pipeline.search("q2", &corpus, &cancel));

  let first: Vec<&str> = first?.iter().map(|r| r.record.text.as_str()).collect();
  let second: Vec<&str> = second?.iter().map(|r| r.record.text.as_str()).collect();
  assert_eq!(first, vec!["b", "c", "a"]);
  assert_eq!(first, second);
  Ok(())
}

#[tokio::test]
async fn test_missing_corpus_file_is_a_load_error() {
  let err = Corpus::load("/nonexistent/olympics.csv").unwrap_err();
  assert!(matches!(err, RagError::CorpusLoad { .. }));
}
