//! RocksDB-backed board store.
//!
//! Column families:
//! - `boards`   — full board snapshots, JSON then LZ4 (keyed by slug)
//! - `metadata` — per-board metadata, bincode (keyed by slug)
//!
//! Snapshot and metadata are written in one batch so a crash never leaves
//! a board without matching metadata. All RocksDB calls run on the
//! blocking pool; the async trait methods only await the join handle.

use futures_util::future::{BoxFuture, FutureExt};
use inkboard_core::Board;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::{BoardStore, StoreError};

const CF_BOARDS: &str = "boards";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_BOARDS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("inkboard_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
        }
    }
}

impl StoreConfig {
    /// Small caches, caller-chosen directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Metadata stored alongside each snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMetadata {
    pub slug: String,
    /// Incremented on every save
    pub revision: u64,
    pub element_count: u64,
    /// Uncompressed JSON size in bytes
    pub snapshot_size: u64,
    pub compressed_size: u64,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl BoardMetadata {
    fn new(slug: &str) -> Self {
        let now = now_secs();
        Self {
            slug: slug.to_string(),
            revision: 0,
            element_count: 0,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

struct RocksInner {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

/// RocksDB board store. Clones share one database handle.
#[derive(Clone)]
pub struct RocksBoardStore {
    inner: Arc<RocksInner>,
}

impl RocksBoardStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened board store at {}", config.path.display());
        Ok(Self {
            inner: Arc::new(RocksInner { db, config }),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_BOARDS => {
                // Values are already LZ4 framed.
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    // ─── Synchronous API ──────────────────────────────────────────────

    /// Write a board snapshot and its metadata atomically.
    pub fn save_snapshot(&self, slug: &str, board: &Board) -> Result<BoardMetadata, StoreError> {
        let inner = &self.inner;
        let cf_boards = inner.cf(CF_BOARDS)?;
        let cf_meta = inner.cf(CF_METADATA)?;

        let json = serde_json::to_vec(board).map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&json);

        let mut meta = self.load_metadata(slug).unwrap_or_else(|_| BoardMetadata::new(slug));
        meta.revision += 1;
        meta.element_count = board.len() as u64;
        meta.snapshot_size = json.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_boards, slug.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, slug.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(inner.config.sync_writes);
        inner.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    pub fn load_snapshot(&self, slug: &str) -> Result<Board, StoreError> {
        let cf = self.inner.cf(CF_BOARDS)?;
        match self.inner.db.get_cf(&cf, slug.as_bytes())? {
            Some(compressed) => {
                let json = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::CompressionError(e.to_string()))?;
                serde_json::from_slice(&json).map_err(|e| StoreError::DeserializationError(e.to_string()))
            }
            None => Err(StoreError::NotFound(slug.to_string())),
        }
    }

    pub fn board_exists(&self, slug: &str) -> Result<bool, StoreError> {
        let cf = self.inner.cf(CF_METADATA)?;
        Ok(self.inner.db.get_cf(&cf, slug.as_bytes())?.is_some())
    }

    pub fn load_metadata(&self, slug: &str) -> Result<BoardMetadata, StoreError> {
        let cf = self.inner.cf(CF_METADATA)?;
        match self.inner.db.get_cf(&cf, slug.as_bytes())? {
            Some(bytes) => BoardMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(slug.to_string())),
        }
    }

    pub fn list_boards(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.inner.cf(CF_METADATA)?;
        let mut slugs = Vec::new();
        for item in self.inner.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            match String::from_utf8(key.to_vec()) {
                Ok(slug) => slugs.push(slug),
                Err(e) => log::warn!("Skipping non-UTF-8 board key: {e}"),
            }
        }
        Ok(slugs)
    }

    pub fn delete_board(&self, slug: &str) -> Result<(), StoreError> {
        let cf_boards = self.inner.cf(CF_BOARDS)?;
        let cf_meta = self.inner.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_boards, slug.as_bytes());
        batch.delete_cf(&cf_meta, slug.as_bytes());
        self.inner.db.write(batch)?;
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.inner.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    fn create_snapshot(&self, slug: &str, board: &Board) -> Result<(), StoreError> {
        if self.board_exists(slug)? {
            return Err(StoreError::AlreadyExists(slug.to_string()));
        }
        self.save_snapshot(slug, board).map(|_| ())
    }

    /// Run a synchronous store call on the blocking pool.
    fn blocking<T, F>(&self, f: F) -> BoxFuture<'static, Result<T, StoreError>>
    where
        T: Send + 'static,
        F: FnOnce(RocksBoardStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        async move {
            tokio::task::spawn_blocking(move || f(store))
                .await
                .map_err(|e| StoreError::DatabaseError(format!("store task failed: {e}")))?
        }
        .boxed()
    }
}

impl RocksInner {
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

impl BoardStore for RocksBoardStore {
    fn load_board(&self, slug: &str) -> BoxFuture<'static, Result<Board, StoreError>> {
        let slug = slug.to_string();
        self.blocking(move |store| store.load_snapshot(&slug))
    }

    fn save_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>> {
        let slug = slug.to_string();
        self.blocking(move |store| store.save_snapshot(&slug, &board).map(|_| ()))
    }

    fn create_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>> {
        let slug = slug.to_string();
        self.blocking(move |store| store.create_snapshot(&slug, &board))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_core::Element;
    use tempfile::tempdir;

    fn sample_board() -> Board {
        Board::new(vec![
            Element::new("a", 1).with_field("type", "rectangle"),
            Element::new(2, 3).with_field("type", "text").with_field("text", "hello"),
        ])
    }

    #[test]
    fn test_snapshot_save_load() {
        let dir = tempdir().unwrap();
        let store = RocksBoardStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        let meta = store.save_snapshot("s1", &sample_board()).unwrap();
        assert_eq!(meta.slug, "s1");
        assert_eq!(meta.revision, 1);
        assert_eq!(meta.element_count, 2);
        assert!(meta.compressed_size > 0);

        assert_eq!(store.load_snapshot("s1").unwrap(), sample_board());
    }

    #[test]
    fn test_snapshot_not_found() {
        let dir = tempdir().unwrap();
        let store = RocksBoardStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        assert_eq!(store.load_snapshot("missing"), Err(StoreError::NotFound("missing".into())));
        assert!(!store.board_exists("missing").unwrap());
    }

    #[test]
    fn test_revision_increments() {
        let dir = tempdir().unwrap();
        let store = RocksBoardStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        store.save_snapshot("s1", &Board::default()).unwrap();
        store.save_snapshot("s1", &sample_board()).unwrap();

        let meta = store.load_metadata("s1").unwrap();
        assert_eq!(meta.revision, 2);
        assert!(meta.updated_at >= meta.created_at);
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempdir().unwrap();
        let store = RocksBoardStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        store.save_snapshot("alpha", &Board::default()).unwrap();
        store.save_snapshot("beta", &Board::default()).unwrap();

        let mut slugs = store.list_boards().unwrap();
        slugs.sort();
        assert_eq!(slugs, vec!["alpha".to_string(), "beta".to_string()]);

        store.delete_board("alpha").unwrap();
        assert!(!store.board_exists("alpha").unwrap());
        assert_eq!(store.list_boards().unwrap(), vec!["beta".to_string()]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksBoardStore::open(StoreConfig::for_testing(dir.path())).unwrap();
            store.save_snapshot("s1", &sample_board()).unwrap();
            store.sync().unwrap();
        }
        let store = RocksBoardStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        let loaded = store.load_snapshot("s1").unwrap();
        assert_eq!(loaded, sample_board());
        // Numeric ids come back numeric.
        assert!(loaded.elements[1].id.is_numeric());
    }

    #[tokio::test]
    async fn test_async_trait_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksBoardStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        store.create_board("s1", Board::default()).await.unwrap();
        assert_eq!(
            store.create_board("s1", Board::default()).await,
            Err(StoreError::AlreadyExists("s1".into()))
        );

        store.save_board("s1", sample_board()).await.unwrap();
        assert_eq!(store.load_board("s1").await.unwrap(), sample_board());
        assert!(matches!(store.load_board("nope").await, Err(StoreError::NotFound(_))));
    }
}
