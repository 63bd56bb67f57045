use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Location of the durable index store.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/codeask.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Extension allowlist, each entry with its leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Glob patterns excluded from the directory walk, on top of the
    /// built-in defaults (.git, target, node_modules, hidden directories).
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_extensions() -> Vec<String> {
    [
        ".py", ".js", ".ts", ".jsx", ".tsx", ".java", ".cpp", ".c", ".h", ".hpp", ".cs", ".go",
        ".rs", ".php", ".rb", ".swift", ".kt", ".scala", ".dart", ".r", ".m", ".pl", ".sh",
        ".sql", ".html", ".css", ".xml", ".json", ".yaml", ".yml", ".toml", ".md", ".txt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks. Must be < chunk_size.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}

fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    /// Base URL of an OpenAI-compatible API. Defaults to api.openai.com.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on concurrent embedding requests; excess callers queue.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_gen_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_gen_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_gen_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// How many nearest chunks to fetch per question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// How many recent conversation turns to offer as context.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Budget for the assembled prompt context, in approximate tokens.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            history_turns: default_history_turns(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_history_turns() -> usize {
    4
}
fn default_max_context_tokens() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardConfig {
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    /// Regex denylist applied to sanitized questions.
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_query_chars: default_max_query_chars(),
            denylist: default_denylist(),
        }
    }
}

fn default_max_query_chars() -> usize {
    1000
}

fn default_denylist() -> Vec<String> {
    [
        r"(?i)ignore\s+(all\s+|any\s+)?(previous|prior|above)\s+instructions",
        r"(?i)disregard\s+(the\s+)?(system|previous)\s+(prompt|instructions)",
        r"(?i)reveal\s+(the\s+|your\s+)?system\s+prompt",
        r"(?i)you\s+are\s+now\s+(in\s+)?(developer|jailbreak)\s+mode",
        r"(?i)(exfiltrate|leak|send\s+me)\s+.*(api\s*[-_ ]?key|password|secret|credential|token)",
        r"(?i)(api\s*[-_ ]?key|password|secret|credential)s?\s*(=|:)\s*\S",
        r"(?i)begin\s+(rsa\s+)?private\s+key",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Maximum retained conversation turns; oldest evicted first.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    50
}

/// Load and validate the configuration.
///
/// A missing file yields the built-in defaults; a present but invalid file
/// is a startup error. The returned `Config` is immutable for the process
/// lifetime and passed explicitly to every component constructor.
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_concurrency == 0 {
        anyhow::bail!("embedding.max_concurrency must be > 0");
    }

    // Validate generation
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_tokens == 0 {
        anyhow::bail!("retrieval.max_context_tokens must be > 0");
    }

    // Validate guard patterns compile
    for pattern in &config.guard.denylist {
        regex::Regex::new(pattern)
            .with_context(|| format!("guard.denylist contains an invalid pattern: {pattern}"))?;
    }

    if config.memory.max_turns == 0 {
        anyhow::bail!("memory.max_turns must be >= 1");
    }

    Ok(config)
}
