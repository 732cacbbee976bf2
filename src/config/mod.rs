//! Configuration management for eidolon
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Prefix for per-identity vector collections
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat-completion model configuration
    #[serde(default)]
    pub chat: ChatConfig,

    /// Speech-to-text backend configuration
    #[serde(default)]
    pub transcribe: TranscribeConfig,

    /// Image captioning backend configuration
    #[serde(default)]
    pub caption: CaptionConfig,

    /// Passage indexing configuration
    #[serde(default)]
    pub passage: PassageConfig,

    /// Conversational turn configuration
    #[serde(default)]
    pub turn: TurnConfig,

    /// Profile analyzer configuration
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

/// Lookup the expected embedding dimension for a known model
pub fn embedding_dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "BAAI/bge-small-en-v1.5" => Some(384),
        "BAAI/bge-base-en-v1.5" => Some(768),
        "BAAI/bge-large-en-v1.5" => Some(1024),
        "sentence-transformers/all-MiniLM-L6-v2" => Some(384),
        _ => None,
    }
}

impl EmbeddingConfig {
    /// Resolve the effective embedding dimension based on the configured model
    pub fn resolved_dimension(&self) -> usize {
        embedding_dimension_for_model(&self.model).unwrap_or(self.dimension)
    }
}

/// Chat-completion model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL of an OpenAI-compatible chat endpoint
    #[serde(default = "default_chat_endpoint")]
    pub endpoint: String,

    /// Model identifier sent with each request
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Environment variable name for the API key
    #[serde(default = "default_chat_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_chat_temperature")]
    pub temperature: f32,
}

impl ChatConfig {
    /// Get the API key from environment, if configured
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

/// Speech-to-text backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeConfig {
    /// Base URL of a whisper-server compatible endpoint
    #[serde(default = "default_transcribe_endpoint")]
    pub endpoint: String,

    /// Model identifier
    #[serde(default = "default_transcribe_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_transcribe_timeout")]
    pub timeout_secs: u64,
}

/// Image captioning backend configuration
///
/// Captions come from a vision-capable chat model; the endpoint defaults to
/// the chat endpoint when left empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Base URL override; empty means "use the chat endpoint"
    #[serde(default)]
    pub endpoint: String,

    /// Model identifier
    #[serde(default = "default_caption_model")]
    pub model: String,

    /// Prompt sent alongside each image
    #[serde(default = "default_caption_prompt")]
    pub prompt: String,
}

/// Passage indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageConfig {
    /// Maximum characters per indexed passage
    #[serde(default = "default_passage_max_chars")]
    pub max_chars: usize,

    /// Minimum characters for a passage to be indexed at all
    #[serde(default = "default_passage_min_chars")]
    pub min_chars: usize,
}

/// Conversational turn configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Number of similar passages retrieved per turn
    #[serde(default = "default_turn_top_k")]
    pub top_k: usize,

    /// Maximum SQL statements the structured-query agent may run per turn
    #[serde(default = "default_turn_max_queries")]
    pub max_queries: usize,

    /// Number of past turns included in the generation prompt
    #[serde(default = "default_turn_history")]
    pub history_turns: usize,

    /// Hard wall-clock timeout for the final generation call, in seconds
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// Maximum result rows fed back to the model per executed query
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

/// Profile analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Maximum SQL statements the analyzer may run
    #[serde(default = "default_analyzer_max_queries")]
    pub max_queries: usize,

    /// Maximum result rows fed back to the model per executed query
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for eidolon data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the identity registry database
    pub registry_file: PathBuf,

    /// Directory holding per-identity datastores
    pub data_dir: PathBuf,

    /// Directory for staged archives and extraction working directories
    pub work_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            collection_prefix: default_collection_prefix(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            transcribe: TranscribeConfig::default(),
            caption: CaptionConfig::default(),
            passage: PassageConfig::default(),
            turn: TurnConfig::default(),
            analyzer: AnalyzerConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: default_chat_endpoint(),
            model: default_chat_model(),
            api_key_env: default_chat_api_key_env(),
            timeout_secs: default_chat_timeout(),
            temperature: default_chat_temperature(),
        }
    }
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_transcribe_endpoint(),
            model: default_transcribe_model(),
            timeout_secs: default_transcribe_timeout(),
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: default_caption_model(),
            prompt: default_caption_prompt(),
        }
    }
}

impl Default for PassageConfig {
    fn default() -> Self {
        Self {
            max_chars: default_passage_max_chars(),
            min_chars: default_passage_min_chars(),
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            top_k: default_turn_top_k(),
            max_queries: default_turn_max_queries(),
            history_turns: default_turn_history(),
            generation_timeout_secs: default_generation_timeout(),
            max_result_rows: default_max_result_rows(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_queries: default_analyzer_max_queries(),
            max_result_rows: default_max_result_rows(),
        }
    }
}

impl Config {
    /// Get the default base directory for eidolon (~/.eidolon)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".eidolon")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn init_paths(&mut self, base: PathBuf) {
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            registry_file: base.join("registry.db"),
            data_dir: base.join("data"),
            work_dir: base.join("work"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::NotInitialized);
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.init_paths(base);
        config.paths.config_file = config_path.to_path_buf();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_config_path())
    }

    /// Save configuration to file, creating the data directories alongside
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.paths.data_dir)?;
        std::fs::create_dir_all(&self.paths.work_dir)?;

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Build a default configuration rooted at the given base directory
    pub fn with_base_dir(base: Option<PathBuf>) -> Self {
        let mut config = Config::default();
        config.init_paths(base.unwrap_or_else(Self::default_base_dir));
        config
    }

    /// Path of the datastore file for an identity
    pub fn datastore_path(&self, identity_id: i64) -> PathBuf {
        self.paths.data_dir.join(format!("archive_{}.db", identity_id))
    }

    /// Name of the vector collection for an identity
    pub fn collection_name(&self, identity_id: i64) -> String {
        format!("{}_{}", self.collection_prefix, identity_id)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.passage.max_chars < self.passage.min_chars {
            return Err(Error::Config(
                "passage.max_chars must be >= passage.min_chars".to_string(),
            ));
        }

        if self.turn.max_queries == 0 {
            return Err(Error::Config(
                "turn.max_queries must be at least 1".to_string(),
            ));
        }

        if self.analyzer.max_queries == 0 {
            return Err(Error::Config(
                "analyzer.max_queries must be at least 1".to_string(),
            ));
        }

        if self.turn.generation_timeout_secs == 0 {
            return Err(Error::Config(
                "turn.generation_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
