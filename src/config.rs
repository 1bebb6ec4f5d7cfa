use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
const DEFAULT_CHAT_MODEL: &str = "deepseek/deepseek-chat-v3.1:free";
const DEFAULT_INDEX_PATH: &str = "policy_index";
const DEFAULT_UPLOAD_DIR: &str = "temp";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Configuration was already installed for this process.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for the policy question-answering server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bearer key sent to the embedding and chat provider.
    pub openrouter_api_key: String,
    /// Base URL of the OpenAI-compatible provider API.
    pub openrouter_base_url: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Chat model used to generate answers.
    pub chat_model: String,
    /// Sampling temperature for answer generation.
    pub chat_temperature: f32,
    /// Upper bound on generated answer tokens.
    pub chat_max_tokens: u32,
    /// Directory holding the persisted vector index.
    pub index_path: PathBuf,
    /// Directory where uploads are staged while being processed.
    pub upload_dir: PathBuf,
    /// Maximum chunk length, in `text_splitter_unit`s.
    pub text_splitter_chunk_size: usize,
    /// Overlap carried from one chunk into the next.
    pub text_splitter_chunk_overlap: usize,
    /// Unit used to measure chunk length.
    pub text_splitter_unit: ChunkUnit,
    /// Number of chunks retrieved for each question.
    pub retrieval_top_k: usize,
    /// Maximum accepted upload body size in bytes.
    pub max_upload_bytes: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// How chunk sizes are measured by the text splitter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// Tokens of the embedding model's encoding.
    Tokens,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required =
            |key: &str| optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()));

        let text_splitter_chunk_size =
            parse_or(optional("TEXT_SPLITTER_CHUNK_SIZE"), "TEXT_SPLITTER_CHUNK_SIZE", 500)?;
        let text_splitter_chunk_overlap = parse_or(
            optional("TEXT_SPLITTER_CHUNK_OVERLAP"),
            "TEXT_SPLITTER_CHUNK_OVERLAP",
            50,
        )?;
        if text_splitter_chunk_size == 0 || text_splitter_chunk_overlap >= text_splitter_chunk_size
        {
            return Err(ConfigError::InvalidValue(
                "TEXT_SPLITTER_CHUNK_OVERLAP must be smaller than TEXT_SPLITTER_CHUNK_SIZE".into(),
            ));
        }

        let retrieval_top_k = parse_or(optional("RETRIEVAL_TOP_K"), "RETRIEVAL_TOP_K", 4)?;
        if retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_TOP_K".into()));
        }

        Ok(Self {
            openrouter_api_key: required("OPENROUTER_API_KEY")?,
            openrouter_base_url: optional("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            embedding_model: optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            chat_model: optional("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            chat_temperature: parse_or(optional("CHAT_TEMPERATURE"), "CHAT_TEMPERATURE", 0.2)?,
            chat_max_tokens: parse_or(optional("CHAT_MAX_TOKENS"), "CHAT_MAX_TOKENS", 300)?,
            index_path: optional("POLICY_INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_PATH)),
            upload_dir: optional("UPLOAD_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            text_splitter_chunk_size,
            text_splitter_chunk_overlap,
            text_splitter_unit: optional("TEXT_SPLITTER_UNIT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("TEXT_SPLITTER_UNIT".into()))
                })
                .transpose()?
                .unwrap_or_default(),
            retrieval_top_k,
            max_upload_bytes: parse_or(
                optional("MAX_UPLOAD_BYTES"),
                "MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            server_port: optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for ChunkUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chars" | "characters" => Ok(Self::Chars),
            "tokens" => Ok(Self::Tokens),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
///
/// `adjust` runs before installation so command-line overrides win over the environment.
pub fn init_config(adjust: impl FnOnce(&mut Config)) -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let mut config = Config::from_env()?;
    adjust(&mut config);
    tracing::debug!(
        base_url = %config.openrouter_base_url,
        embedding_model = %config.embedding_model,
        chat_model = %config.chat_model,
        index_path = %config.index_path.display(),
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(get_config())
}
