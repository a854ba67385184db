//! Layered configuration: built-in defaults, then the YAML config file, then
//! command-line flags and environment variables.

use clap::Args;
use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::openai::{ClientConfig, SamplingParams, DEFAULT_BASE_URL};
use crate::pipeline::PipelineSettings;

pub const DEFAULT_CORPUS: &str = "./winter_olympics_2022.csv";
const CONFIG_DIR: &str = "ragnar";
const CONFIG_FILE: &str = "config.yaml";
/// One hour per collaborator call
pub const MAX_TIMEOUT_SECS: u64 = 3600;
const TRANSPORT_HEADROOM: Duration = Duration::from_secs(5);

/// Contents of `config.yaml`; every key is optional
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
  pub api_key: Option<String>,
  pub base_url: Option<String>,
  pub corpus: Option<PathBuf>,
  pub embedding_model: Option<String>,
  pub generation_model: Option<String>,
  pub top_k: Option<usize>,
  pub timeout_secs: Option<u64>,
  pub framing: Option<String>,
  pub system_message: Option<String>,
  pub sampling: Option<SamplingParams>,
}

/// Flags shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
  /// Path to a YAML config file
  #[arg(long, env = "RAGNAR_CONFIG", global = true)]
  pub config: Option<PathBuf>,
  /// API key for the embedding and generation service
  #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
  pub api_key: Option<String>,
  /// Base URL of an OpenAI-compatible API
  #[arg(long, env = "OPENAI_BASE_URL", global = true)]
  pub base_url: Option<String>,
  /// CSV corpus with `text` and `embedding` columns
  #[arg(long, env = "RAGNAR_CORPUS", global = true)]
  pub corpus: Option<PathBuf>,
  /// Model used to embed the query
  #[arg(long, global = true)]
  pub embedding_model: Option<String>,
  /// Model used to generate the answer
  #[arg(long, global = true)]
  pub generation_model: Option<String>,
  /// Number of records used as context
  #[arg(short = 'k', long, global = true)]
  pub top_k: Option<NonZeroUsize>,
  /// Per-request timeout in seconds
  #[arg(long, global = true)]
  pub timeout_secs: Option<u64>,
  /// Maximum answer length in tokens
  #[arg(long, global = true)]
  pub max_tokens: Option<u32>,
  /// Sampling temperature
  #[arg(long, global = true)]
  pub temperature: Option<f32>,
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
  pub api_key: Option<String>,
  pub base_url: String,
  pub corpus: PathBuf,
  pub pipeline: PipelineSettings,
}

impl Settings {
  /// Discover and load the config file, then apply flag overrides
  pub fn resolve(args: &ConfigArgs) -> Result<Self> {
    let file = match discover_config_path(args.config.as_deref())? {
      Some(path) => {
        tracing::debug!("Using config file {}", path.display());
        load_file(&path)?
      }
      None => FileConfig::default(),
    };

    let settings = Self::from_parts(file, args)?;
    settings.validate()?;
    Ok(settings)
  }

  pub fn from_parts(file: FileConfig, args: &ConfigArgs) -> Result<Self> {
    let defaults = PipelineSettings::default();

    let top_k = match (args.top_k, file.top_k) {
      (Some(k), _) => k,
      (None, Some(k)) => {
        NonZeroUsize::new(k).ok_or_else(|| RagError::config("top_k must be greater than zero"))?
      }
      (None, None) => defaults.top_k,
    };

    let mut sampling = file.sampling.unwrap_or_default();
    if let Some(max_tokens) = args.max_tokens {
      sampling.max_tokens = max_tokens;
    }
    if let Some(temperature) = args.temperature {
      sampling.temperature = temperature;
    }

    let timeout = args
      .timeout_secs
      .or(file.timeout_secs)
      .map(Duration::from_secs)
      .unwrap_or(defaults.timeout);

    let pipeline = PipelineSettings {
      embedding_model: pick(&args.embedding_model, file.embedding_model, defaults.embedding_model),
      generation_model: pick(
        &args.generation_model,
        file.generation_model,
        defaults.generation_model,
      ),
      top_k,
      timeout,
      sampling,
      framing: file.framing.unwrap_or(defaults.framing),
      system_message: file.system_message.unwrap_or(defaults.system_message),
    };

    Ok(Self {
      api_key: args.api_key.clone().or(file.api_key).filter(|key| !key.trim().is_empty()),
      base_url: pick(&args.base_url, file.base_url, DEFAULT_BASE_URL.to_string()),
      corpus: args.corpus.clone().or(file.corpus).unwrap_or_else(|| PathBuf::from(DEFAULT_CORPUS)),
      pipeline,
    })
  }

  pub fn validate(&self) -> Result<()> {
    let sampling = &self.pipeline.sampling;

    if self.pipeline.timeout.is_zero() {
      return Err(RagError::config("timeout must be at least one second"));
    }
    if self.pipeline.timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
      return Err(RagError::config(format!(
        "timeout of {}s exceeds the {MAX_TIMEOUT_SECS}s limit",
        self.pipeline.timeout.as_secs()
      )));
    }
    if !(0.0..=2.0).contains(&sampling.temperature) {
      let temperature = sampling.temperature;
      return Err(RagError::config(format!("temperature {temperature} is outside [0, 2]")));
    }
    if !(sampling.top_p > 0.0 && sampling.top_p <= 1.0) {
      return Err(RagError::config(format!("top_p {} is outside (0, 1]", sampling.top_p)));
    }
    if sampling.n == 0 {
      return Err(RagError::config("n must be at least 1"));
    }
    if sampling.max_tokens == 0 {
      return Err(RagError::config("max_tokens must be at least 1"));
    }
    if sampling.stream {
      return Err(RagError::config("streamed responses are not supported"));
    }
    if !self.pipeline.framing.contains("{query}") {
      tracing::warn!("Prompt framing has no {{query}} placeholder; the question will not be sent");
    }

    Ok(())
  }

  /// Network commands cannot run without a key
  pub fn require_api_key(&self) -> Result<&str> {
    self
      .api_key
      .as_deref()
      .ok_or_else(|| RagError::config("no API key found; set OPENAI_API_KEY or pass --api-key"))
  }

  pub fn client_config(&self) -> Result<ClientConfig> {
    let mut config = ClientConfig::new(self.require_api_key()?);
    config.base_url = self.base_url.clone();
    // Leave headroom so the pipeline's own timeout fires first
    config.timeout = self.pipeline.timeout.saturating_add(TRANSPORT_HEADROOM);
    Ok(config)
  }
}

fn pick(flag: &Option<String>, file: Option<String>, default: String) -> String {
  flag.clone().or(file).unwrap_or(default)
}

/// An explicit path must exist; otherwise fall back to the per-user config if present
pub fn discover_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
  if let Some(path) = explicit {
    if !path.exists() {
      return Err(RagError::config(format!("config file {} does not exist", path.display())));
    }
    return Ok(Some(path.to_path_buf()));
  }

  Ok(default_config_path().filter(|path| path.exists()))
}

pub fn default_config_path() -> Option<PathBuf> {
  dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn load_file(path: &Path) -> Result<FileConfig> {
  let content = fs::read_to_string(path)
    .map_err(|e| RagError::config(format!("failed to read {}: {e}", path.display())))?;

  if content.trim().is_empty() {
    return Ok(FileConfig::default());
  }

  serde_yaml::from_str(&content)
    .map_err(|e| RagError::config(format!("failed to parse {}: {e}", path.display())))
}
