//! Persistent run cache for chunking and embedding results.
//!
//! Three JSON stores live under the cache directory:
//!
//! ```text
//! settings_index.json   settings fingerprint -> { chunks_key, sources, time }
//! chunk_sets.json       "{settings}_{sources}" -> [Chunk] (embeddings stripped)
//! embeddings.json       model -> chunk id -> vector
//! ```
//!
//! Chunk sets are valid only while both fingerprints match and the entry is
//! younger than [`CHUNK_FRESHNESS`]. Embeddings never expire: chunk ids are
//! content-addressed, so a stored vector stays correct for its id. Everything
//! is held in memory and flushed on mutation; corrupt stores are replaced
//! with empty ones rather than failing the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::CacheSettings;
use crate::types::{Chunk, ChunkEmbedding, PipelineError, Source};

/// Maximum age of a cached chunk set before it is treated as stale.
pub const CHUNK_FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Default retention horizon for [`PipelineCache::cleanup_old`].
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const SETTINGS_INDEX_FILE: &str = "settings_index.json";
const CHUNK_SETS_FILE: &str = "chunk_sets.json";
const EMBEDDINGS_FILE: &str = "embeddings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEntry {
    chunks_key: String,
    sources_hash: String,
    /// Seconds since the Unix epoch at store time.
    timestamp: i64,
    chunk_count: usize,
}

/// On-disk cache shared across pipeline runs in the same process.
///
/// Callers hold it exclusively; there is no cross-process locking.
#[derive(Debug)]
pub struct PipelineCache {
    dir: PathBuf,
    settings_index: BTreeMap<String, SettingsEntry>,
    chunk_sets: BTreeMap<String, Vec<Chunk>>,
    embeddings: BTreeMap<String, BTreeMap<String, Vec<f32>>>,
}

impl PipelineCache {
    /// Opens (creating if needed) the cache under `dir` and loads all stores.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            settings_index: load_store(&dir.join(SETTINGS_INDEX_FILE)).await?,
            chunk_sets: load_store(&dir.join(CHUNK_SETS_FILE)).await?,
            embeddings: load_store(&dir.join(EMBEDDINGS_FILE)).await?,
            dir,
        })
    }

    /// Returns the cached chunk set for `(settings, sources)` if it is still
    /// fresh, or `None` on any mismatch.
    pub fn get_chunks(
        &self,
        settings: &CacheSettings,
        sources: &[Source],
    ) -> Result<Option<Vec<Chunk>>, PipelineError> {
        self.get_chunks_at(settings, sources, unix_now())
    }

    fn get_chunks_at(
        &self,
        settings: &CacheSettings,
        sources: &[Source],
        now: i64,
    ) -> Result<Option<Vec<Chunk>>, PipelineError> {
        let settings_hash = settings_fingerprint(settings)?;
        let sources_hash = sources_fingerprint(sources)?;

        let Some(entry) = self.settings_index.get(&settings_hash) else {
            debug!(%settings_hash, "cache miss: unknown settings");
            return Ok(None);
        };
        if entry.sources_hash != sources_hash {
            debug!(%settings_hash, "cache miss: source list changed");
            return Ok(None);
        }
        let age = Duration::from_secs(now.saturating_sub(entry.timestamp).max(0) as u64);
        if age > CHUNK_FRESHNESS {
            debug!(%settings_hash, age_secs = age.as_secs(), "cache miss: stale entry");
            return Ok(None);
        }
        let Some(chunks) = self.chunk_sets.get(&entry.chunks_key) else {
            warn!(key = %entry.chunks_key, "cache index points at missing chunk set");
            return Ok(None);
        };
        info!(
            %settings_hash,
            chunks = chunks.len(),
            age_secs = age.as_secs(),
            "cache hit"
        );
        Ok(Some(chunks.clone()))
    }

    /// Stores a chunk set under the pair of fingerprints. Embeddings are
    /// stripped first; the embedding store is the only home for vectors.
    pub async fn put_chunks(
        &mut self,
        settings: &CacheSettings,
        sources: &[Source],
        chunks: &[Chunk],
    ) -> Result<(), PipelineError> {
        let settings_hash = settings_fingerprint(settings)?;
        let sources_hash = sources_fingerprint(sources)?;
        let chunks_key = format!("{settings_hash}_{sources_hash}");

        let stripped: Vec<Chunk> = chunks
            .iter()
            .map(|chunk| Chunk {
                embedding: ChunkEmbedding::Pending,
                ..chunk.clone()
            })
            .collect();

        self.settings_index.insert(
            settings_hash,
            SettingsEntry {
                chunks_key: chunks_key.clone(),
                sources_hash,
                timestamp: unix_now(),
                chunk_count: stripped.len(),
            },
        );
        self.chunk_sets.insert(chunks_key, stripped);
        self.flush_chunks().await
    }

    /// Looks up stored vectors for `ids` under `model`. Missing ids are
    /// simply absent from the result.
    pub fn embeddings_for<'a>(
        &self,
        model: &str,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, Vec<f32>> {
        let Some(by_id) = self.embeddings.get(model) else {
            return BTreeMap::new();
        };
        ids.into_iter()
            .filter_map(|id| by_id.get(id).map(|v| (id.to_string(), v.clone())))
            .collect()
    }

    /// Merges new vectors into the store. Existing entries for other ids are
    /// kept; an id that reappears is overwritten with the newer vector.
    pub async fn put_embeddings(
        &mut self,
        model: &str,
        vectors: impl IntoIterator<Item = (String, Vec<f32>)>,
    ) -> Result<(), PipelineError> {
        let by_id = self.embeddings.entry(model.to_string()).or_default();
        let mut added = 0usize;
        for (id, vector) in vectors {
            by_id.insert(id, vector);
            added += 1;
        }
        debug!(model, added, total = by_id.len(), "merged embeddings");
        self.save(EMBEDDINGS_FILE, &self.embeddings).await
    }

    /// Drops every store. Used when the caller knows the cache can no longer
    /// be trusted, e.g. after a tokenizer vocabulary change.
    pub async fn invalidate_all(&mut self, reason: &str) -> Result<(), PipelineError> {
        warn!(reason, "invalidating entire pipeline cache");
        self.settings_index.clear();
        self.chunk_sets.clear();
        self.embeddings.clear();
        self.flush().await
    }

    /// Rewrites every store. Mutating calls already flush; this is an
    /// explicit sync point for callers that want one.
    pub async fn flush(&self) -> Result<(), PipelineError> {
        self.flush_chunks().await?;
        self.save(EMBEDDINGS_FILE, &self.embeddings).await
    }

    /// Removes settings entries older than `max_age` (default
    /// [`DEFAULT_RETENTION`]) and any chunk set no entry references.
    /// Embeddings are untouched.
    pub async fn cleanup_old(&mut self, max_age: Option<Duration>) -> Result<(), PipelineError> {
        let max_age = max_age.unwrap_or(DEFAULT_RETENTION);
        let now = unix_now();
        let before = self.settings_index.len();
        self.settings_index.retain(|_, entry| {
            Duration::from_secs(now.saturating_sub(entry.timestamp).max(0) as u64) <= max_age
        });

        let live: Vec<String> = self
            .settings_index
            .values()
            .map(|entry| entry.chunks_key.clone())
            .collect();
        self.chunk_sets.retain(|key, _| live.contains(key));

        let removed = before - self.settings_index.len();
        if removed > 0 {
            info!(removed, "pruned stale cache entries");
        }
        self.flush_chunks().await
    }

    async fn flush_chunks(&self) -> Result<(), PipelineError> {
        self.save(SETTINGS_INDEX_FILE, &self.settings_index).await?;
        self.save(CHUNK_SETS_FILE, &self.chunk_sets).await
    }

    async fn save<T: Serialize>(&self, file: &str, value: &T) -> Result<(), PipelineError> {
        let body = serde_json::to_string_pretty(value)?;
        fs::write(self.dir.join(file), body).await?;
        Ok(())
    }
}

/// First 16 hex chars of the SHA-256 of the canonical JSON form of the
/// settings. `serde_json` maps are ordered, so the form is stable.
pub fn settings_fingerprint(settings: &CacheSettings) -> Result<String, PipelineError> {
    let value = serde_json::to_value(settings)?;
    Ok(short_sha256(&serde_json::to_string(&value)?))
}

/// Fingerprint of the ordered source list's identity fields. Adding,
/// removing, reordering, or retitling a source all change it.
pub fn sources_fingerprint(sources: &[Source]) -> Result<String, PipelineError> {
    let identity: Vec<serde_json::Value> = sources
        .iter()
        .map(|source| {
            serde_json::json!({
                "id": source.id,
                "url": source.url,
                "title": source.title,
                "tags": source.tags,
            })
        })
        .collect();
    Ok(short_sha256(&serde_json::to_string(&identity)?))
}

fn short_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

async fn load_store<T>(path: &Path) -> Result<T, PipelineError>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path).await {
        Ok(body) => match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt cache store, starting empty");
                Ok(T::default())
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentFeatures, ContentKind, NearDuplicateHash, SectionKind};

    fn settings() -> CacheSettings {
        CacheSettings {
            max_tokens: 700,
            overlap_tokens: 80,
            min_tokens: 40,
            embed_model: "text-embedding-3-small".to_string(),
            embed_batch_size: 64,
            sources_file: "sources.yaml".to_string(),
        }
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            doc_id: "doc_abc123".to_string(),
            text: "body text".to_string(),
            source_url: "https://example.com/page".to_string(),
            canonical_url: "https://example.com/page".to_string(),
            title_path: vec!["Page".to_string()],
            chunk_index: 0,
            total_chunks: 1,
            token_count: 42,
            content_hash: "deadbeef".repeat(5),
            near_duplicate_hash: NearDuplicateHash {
                value: 7,
                degraded: false,
            },
            quality_score: 1.0,
            is_low_signal: false,
            low_signal_reason: String::new(),
            retrieval_weight: 1.0,
            language: "en".to_string(),
            section_kind: SectionKind::Structured,
            features: ContentFeatures::default(),
            tags: BTreeMap::new(),
            embedding: ChunkEmbedding::Embedded(vec![0.5, 0.5]),
        }
    }

    fn source(url: &str) -> Source {
        Source {
            id: url.rsplit('/').next().unwrap_or("src").to_string(),
            url: url.to_string(),
            title: "Page".to_string(),
            tags: BTreeMap::new(),
            content_kind: ContentKind::Html,
            language_hint: None,
        }
    }

    fn urls() -> Vec<Source> {
        vec![source("https://example.com/page")]
    }

    #[tokio::test]
    async fn put_then_get_round_trips_without_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineCache::open(dir.path()).await.unwrap();
        cache
            .put_chunks(&settings(), &urls(), &[chunk("doc_abc123#00000-deadbeef")])
            .await
            .unwrap();

        let hit = cache.get_chunks(&settings(), &urls()).unwrap().unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].embedding, ChunkEmbedding::Pending);
    }

    #[tokio::test]
    async fn any_settings_change_misses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineCache::open(dir.path()).await.unwrap();
        cache
            .put_chunks(&settings(), &urls(), &[chunk("c1")])
            .await
            .unwrap();

        let mut changed = settings();
        changed.max_tokens = 500;
        assert!(cache.get_chunks(&changed, &urls()).unwrap().is_none());

        let mut changed = settings();
        changed.embed_model = "other-model".to_string();
        assert!(cache.get_chunks(&changed, &urls()).unwrap().is_none());
    }

    #[tokio::test]
    async fn source_list_change_misses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineCache::open(dir.path()).await.unwrap();
        cache
            .put_chunks(&settings(), &urls(), &[chunk("c1")])
            .await
            .unwrap();

        let other = vec![source("https://example.com/other")];
        assert!(cache.get_chunks(&settings(), &other).unwrap().is_none());
    }

    #[tokio::test]
    async fn source_identity_fields_feed_the_fingerprint() {
        let base = vec![source("https://a.example"), source("https://b.example")];
        let reordered = vec![source("https://b.example"), source("https://a.example")];
        assert_ne!(
            sources_fingerprint(&base).unwrap(),
            sources_fingerprint(&reordered).unwrap()
        );

        let mut retitled = base.clone();
        retitled[0].title = "Renamed".to_string();
        assert_ne!(
            sources_fingerprint(&base).unwrap(),
            sources_fingerprint(&retitled).unwrap()
        );

        // Fields outside the identity set do not invalidate.
        let mut rehinted = base.clone();
        rehinted[0].language_hint = Some("de".to_string());
        assert_eq!(
            sources_fingerprint(&base).unwrap(),
            sources_fingerprint(&rehinted).unwrap()
        );
    }

    #[tokio::test]
    async fn entries_expire_after_freshness_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineCache::open(dir.path()).await.unwrap();
        cache
            .put_chunks(&settings(), &urls(), &[chunk("c1")])
            .await
            .unwrap();

        let future = unix_now() + CHUNK_FRESHNESS.as_secs() as i64 + 60;
        assert!(
            cache
                .get_chunks_at(&settings(), &urls(), future)
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn cache_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = PipelineCache::open(dir.path()).await.unwrap();
            cache
                .put_chunks(&settings(), &urls(), &[chunk("c1")])
                .await
                .unwrap();
            cache
                .put_embeddings("m", [("c1".to_string(), vec![1.0])])
                .await
                .unwrap();
        }
        let cache = PipelineCache::open(dir.path()).await.unwrap();
        assert!(cache.get_chunks(&settings(), &urls()).unwrap().is_some());
        assert_eq!(cache.embeddings_for("m", ["c1"]).len(), 1);
    }

    #[tokio::test]
    async fn corrupt_store_is_replaced_with_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(SETTINGS_INDEX_FILE), "{not json")
            .await
            .unwrap();
        let cache = PipelineCache::open(dir.path()).await.unwrap();
        assert!(cache.get_chunks(&settings(), &urls()).unwrap().is_none());
    }

    #[tokio::test]
    async fn embeddings_merge_keeps_existing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineCache::open(dir.path()).await.unwrap();
        cache
            .put_embeddings("m", [("a".to_string(), vec![1.0])])
            .await
            .unwrap();
        cache
            .put_embeddings("m", [("b".to_string(), vec![2.0])])
            .await
            .unwrap();

        let got = cache.embeddings_for("m", ["a", "b", "missing"]);
        assert_eq!(got.len(), 2);
        assert_eq!(got["a"], vec![1.0]);
    }

    #[tokio::test]
    async fn cleanup_prunes_unreferenced_chunk_sets() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineCache::open(dir.path()).await.unwrap();
        cache
            .put_chunks(&settings(), &urls(), &[chunk("c1")])
            .await
            .unwrap();

        // Re-store under the same settings with a different source list; the
        // old chunk set becomes unreferenced.
        let other = vec![source("https://example.com/other")];
        cache
            .put_chunks(&settings(), &other, &[chunk("c2")])
            .await
            .unwrap();

        cache.cleanup_old(None).await.unwrap();
        assert_eq!(cache.chunk_sets.len(), 1);
        assert!(cache.get_chunks(&settings(), &other).unwrap().is_some());
    }

    #[tokio::test]
    async fn invalidate_all_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PipelineCache::open(dir.path()).await.unwrap();
        cache
            .put_chunks(&settings(), &urls(), &[chunk("c1")])
            .await
            .unwrap();
        cache
            .put_embeddings("m", [("c1".to_string(), vec![1.0])])
            .await
            .unwrap();

        cache.invalidate_all("test").await.unwrap();
        assert!(cache.get_chunks(&settings(), &urls()).unwrap().is_none());
        assert!(cache.embeddings_for("m", ["c1"]).is_empty());
    }
}
