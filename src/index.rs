//! Persisted vector index: build, load, nearest-neighbor search.
//!
//! The index is a single SQLite database holding every embedded chunk plus
//! a `meta` table describing how it was built (embedding model, dimensions,
//! build time). It is written wholesale by [`build_index`] and loaded
//! wholesale by [`VectorIndex::load`]; there is no incremental update —
//! rebuilding means deleting and re-running the builder.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::chunk::{chunk_text, Chunk};
use crate::config::Config;
use crate::crawl;
use crate::embedding::{
    blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider, GeminiEmbedder,
};
use crate::error::CopilotError;

/// A chunk paired with its embedding, ready for persistence.
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Crawl all configured sources, chunk and embed every page, and write a
/// fresh index at the configured path. Idempotent from-scratch rebuild:
/// any existing index file is replaced. A failed source crawl aborts the
/// build with [`CopilotError::SourceCrawl`].
pub async fn build_index(config: &Config, api_key: &str) -> Result<()> {
    if config.sources.is_empty() {
        anyhow::bail!("no [[sources]] configured; nothing to index");
    }

    let client = crawl::crawl_client()?;

    let mut pages = Vec::new();
    for source in &config.sources {
        let crawled = crawl::crawl_source(&client, source).await?;
        println!("  loaded {} pages from {}", crawled.len(), source.sitemap_url);
        pages.extend(crawled);
    }
    println!("  total pages: {}", pages.len());

    let mut chunks = Vec::new();
    for page in &pages {
        chunks.extend(chunk_text(
            &page.url,
            &page.body,
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
        ));
    }
    println!("  created {} text chunks", chunks.len());

    let embedder = GeminiEmbedder::new(api_key.to_string(), &config.embedding)?;

    let mut embedded = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        for (chunk, embedding) in batch.iter().cloned().zip(vectors) {
            embedded.push(EmbeddedChunk { chunk, embedding });
        }
    }

    save_index(&config.index.path, embedder.model_name(), &embedded).await?;
    println!("  index saved to {}", config.index.path.display());

    Ok(())
}

/// Write embedded chunks wholesale to a fresh index file.
pub async fn save_index(
    path: &Path,
    embedding_model: &str,
    chunks: &[EmbeddedChunk],
) -> Result<()> {
    // From-scratch rebuild: drop any previous index file first.
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove old index at {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = open_pool(path, true).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_url TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let now = chrono::Utc::now().timestamp();
    let dims = chunks.first().map(|c| c.embedding.len()).unwrap_or(0);

    let mut tx = pool.begin().await?;

    for (key, value) in [
        ("embedding_model", embedding_model.to_string()),
        ("dims", dims.to_string()),
        ("built_at", now.to_string()),
    ] {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for ec in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, source_url, chunk_index, content, hash, embedding, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ec.chunk.id)
        .bind(&ec.chunk.source_url)
        .bind(ec.chunk.chunk_index)
        .bind(&ec.chunk.content)
        .bind(&ec.chunk.hash)
        .bind(vec_to_blob(&ec.embedding))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    pool.close().await;
    Ok(())
}

async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// One chunk held in memory by a loaded index.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub content: String,
    pub source_url: String,
    pub embedding: Vec<f32>,
}

/// In-memory nearest-neighbor structure over the persisted chunks.
///
/// Loaded once per process; queries are cosine-similarity scans over the
/// full chunk set, which is the right trade-off at documentation-corpus
/// scale (thousands of chunks, not millions).
#[derive(Debug)]
pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Load the whole index from disk. A missing file is
    /// [`CopilotError::IndexNotFound`], downcastable from the returned
    /// error — it signals a setup problem, not a query-time problem.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CopilotError::IndexNotFound(path.to_path_buf()).into());
        }

        let pool = open_pool(path, false).await?;

        let rows = sqlx::query(
            "SELECT content, source_url, embedding FROM chunks ORDER BY source_url, chunk_index",
        )
        .fetch_all(&pool)
        .await
        .context("failed to read chunks from index")?;

        let chunks = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexedChunk {
                    content: row.get("content"),
                    source_url: row.get("source_url"),
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect();

        pool.close().await;
        Ok(Self { chunks })
    }

    /// Build an index directly from embedded chunks. Used by tests and by
    /// callers that already hold the chunks in memory.
    pub fn from_chunks(chunks: Vec<IndexedChunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Up to `k` chunks by descending cosine similarity to `query_vec`.
    /// No minimum similarity threshold: weakly relevant chunks are still
    /// returned. Fewer than `k` chunks means all of them; an empty index
    /// yields an empty Vec.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<(&IndexedChunk, f32)> {
        let mut scored: Vec<(&IndexedChunk, f32)> = self
            .chunks
            .iter()
            .map(|c| (c, cosine_similarity(query_vec, &c.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;

    fn embedded(content: &str, source: &str, vector: Vec<f32>) -> EmbeddedChunk {
        let chunk = chunk_text(source, content, 1000, 200).remove(0);
        EmbeddedChunk {
            chunk,
            embedding: vector,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");

        let chunks = vec![
            embedded("alpha text", "https://d/a", vec![1.0, 0.0]),
            embedded("beta text", "https://d/b", vec![0.0, 1.0]),
        ];
        save_index(&path, "text-embedding-004", &chunks).await.unwrap();

        let index = VectorIndex::load(&path).await.unwrap();
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_index_is_distinct_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("absent.sqlite");

        let err = VectorIndex::load(&path).await.unwrap_err();
        let copilot_err = err.downcast_ref::<CopilotError>().unwrap();
        assert!(matches!(copilot_err, CopilotError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn test_rebuild_replaces_old_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");

        let first = vec![embedded("one", "https://d/1", vec![1.0, 0.0])];
        save_index(&path, "m", &first).await.unwrap();

        let second = vec![
            embedded("two", "https://d/2", vec![1.0, 0.0]),
            embedded("three", "https://d/3", vec![0.0, 1.0]),
        ];
        save_index(&path, "m", &second).await.unwrap();

        let index = VectorIndex::load(&path).await.unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = VectorIndex::from_chunks(vec![
            IndexedChunk {
                content: "far".into(),
                source_url: "https://d/far".into(),
                embedding: vec![0.0, 1.0],
            },
            IndexedChunk {
                content: "near".into(),
                source_url: "https://d/near".into(),
                embedding: vec![1.0, 0.0],
            },
        ]);

        let results = index.search(&[1.0, 0.1], 2);
        assert_eq!(results[0].0.content, "near");
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn test_search_fewer_chunks_than_k() {
        let index = VectorIndex::from_chunks(vec![IndexedChunk {
            content: "only".into(),
            source_url: "https://d/only".into(),
            embedding: vec![1.0, 0.0],
        }]);

        let results = index.search(&[1.0, 0.0], 7);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::from_chunks(Vec::new());
        assert!(index.search(&[1.0, 0.0], 7).is_empty());
        assert!(index.is_empty());
    }
}
