//! Ragnar - retrieval-augmented question answering
//!
//! Embeds a question, ranks a small pre-embedded corpus by cosine similarity,
//! and asks a language model to answer using the best matches as context.

pub mod codec;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod error;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod similarity;

pub use corpus::{Corpus, CorpusRecord};
pub use error::{RagError, Result};
pub use pipeline::{Answer, PipelineSettings, Query, RetrievalPipeline};
pub use similarity::RankedResult;
