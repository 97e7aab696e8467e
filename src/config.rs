use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the language-model provider credential.
/// Its absence is a fatal precondition, checked once before any core
/// operation runs.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Path of the persisted SQLite index.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// How many chunks the answer generator retrieves per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embed_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embed_model() -> String {
    "text-embedding-004".to_string()
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

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// JSON array of `{id, subject, body}` tickets, read once at start.
    pub tickets_path: PathBuf,
    /// Where the classification cache is written. Existence of this file
    /// gates the bulk pipeline's fast path.
    pub cache_path: PathBuf,
    /// Fixed delay between classification calls, sized against the
    /// provider's requests-per-minute ceiling (4s = 15 req/min).
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_delay_secs() -> u64 {
    4
}

/// One documentation source: a sitemap plus the URL prefix its pages must
/// match. Off-prefix links are skipped to avoid following off-domain pages.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub sitemap_url: String,
    pub url_prefix: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(config)
}

/// Read the provider credential from the environment. Called once, before
/// any command that talks to the model provider.
pub fn require_api_key() -> Result<String> {
    std::env::var(API_KEY_ENV)
        .with_context(|| format!("{} is not set; add it to the environment", API_KEY_ENV))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("copilot.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (tmp, path)
    }

    const MINIMAL: &str = r#"
[index]
path = "data/copilot.sqlite"

[pipeline]
tickets_path = "data/sample_tickets.json"
cache_path = "data/classified_tickets_cache.json"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_tmp, path) = write_config(MINIMAL);
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.pipeline.delay_secs, 4);
        assert_eq!(config.embedding.model, "text-embedding-004");
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_sources_parse() {
        let content = format!(
            "{}\n[[sources]]\nsitemap_url = \"https://docs.example.com/sitemap.xml\"\nurl_prefix = \"https://docs.example.com/\"\n",
            MINIMAL
        );
        let (_tmp, path) = write_config(&content);
        let config = load_config(&path).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].url_prefix, "https://docs.example.com/");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let content = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let (_tmp, path) = write_config(&content);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let content = format!("{}\n[retrieval]\ntop_k = 0\n", MINIMAL);
        let (_tmp, path) = write_config(&content);
        assert!(load_config(&path).is_err());
    }
}
