// File: src/persistence.rs
//! Storage port for the recommendation core, plus the two shipped backends.
//!
//! The engine only ever sees the `StateStore` trait: opaque blobs for model
//! state, an append-only order log, and the retraining counter. `FileStore`
//! keeps everything in one directory; every blob and counter write goes
//! through a temp file followed by a rename, so a retried or interrupted save
//! never leaves a torn file. `MemoryStore` is the injectable fake for tests
//! and ephemeral embeddings.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::core::types::{OrderRecord, TrainingCounter};
use crate::error::{RecommenderError, Result};

/// Blob key for the serialized predictor weights.
pub const MODEL_BLOB_KEY: &str = "predictor-model";
/// Blob key for the one-shot cold-start marker.
pub const INIT_MARKER_KEY: &str = "initialization-status";
/// Blob key for the adjustment table.
pub const ADJUSTMENTS_BLOB_KEY: &str = "rl-adjustments";

/// Retrain after every N orders unless the embedder overrides it.
pub const DEFAULT_TRAINING_FREQUENCY: u64 = 10;

/// Key-value + order-log port consumed by the engine. Implementations must
/// keep saves idempotent; reads may lag concurrent writes.
pub trait StateStore: Send + Sync {
    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn save_blob(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn append_order(&self, record: &OrderRecord) -> Result<()>;
    fn all_orders(&self) -> Result<Vec<OrderRecord>>;
    /// Counts one order and reports (new total, retraining due).
    fn increment_and_check_counter(&self) -> Result<(u64, bool)>;
    /// Stamps the counter after a successful retraining pass.
    fn mark_trained(&self, at: DateTime<Utc>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FileStore

/// Directory-backed store: `<key>.bin` blobs, a JSON-lines order log and a
/// JSON counter file.
pub struct FileStore {
    dir: PathBuf,
    training_frequency: u64,
    // Serializes counter read-modify-write and log appends.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>, training_frequency: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, training_frequency, write_lock: Mutex::new(()) })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    fn orders_path(&self) -> PathBuf {
        self.dir.join("orders.jsonl")
    }

    fn counter_path(&self) -> PathBuf {
        self.dir.join("counter.json")
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let temp_file = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(&temp_file);
            writer.write_all(bytes)?;
            writer.flush()?;
        }
        temp_file
            .persist(path)
            .map_err(|e| RecommenderError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn read_counter(&self) -> Result<TrainingCounter> {
        match File::open(self.counter_path()) {
            Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(TrainingCounter::new(self.training_frequency))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_counter(&self, counter: &TrainingCounter) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(counter)?;
        self.write_atomic(&self.counter_path(), &bytes)
    }
}

impl StateStore for FileStore {
    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.write_atomic(&self.blob_path(key), bytes)
    }

    fn append_order(&self, record: &OrderRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.orders_path())?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn all_orders(&self) -> Result<Vec<OrderRecord>> {
        let file = match File::open(self.orders_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut orders = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            orders.push(serde_json::from_str(&line)?);
        }
        Ok(orders)
    }

    fn increment_and_check_counter(&self) -> Result<(u64, bool)> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut counter = self.read_counter()?;
        let (count, due) = counter.advance();
        self.write_counter(&counter)?;
        Ok((count, due))
    }

    fn mark_trained(&self, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut counter = self.read_counter()?;
        counter.last_training_timestamp = Some(at);
        self.write_counter(&counter)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore

struct MemoryInner {
    blobs: HashMap<String, Vec<u8>>,
    orders: Vec<OrderRecord>,
    counter: TrainingCounter,
}

/// In-memory store for tests and throwaway sessions. `fail_saves` turns every
/// write into a `Persistence` error so callers' degraded paths can be tested.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new(training_frequency: u64) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                blobs: HashMap::new(),
                orders: Vec::new(),
                counter: TrainingCounter::new(training_frequency),
            }),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn order_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).orders.len()
    }

    pub fn has_blob(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .blobs
            .contains_key(key)
    }

    pub fn last_training_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .counter
            .last_training_timestamp
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            Err(RecommenderError::Persistence("simulated storage failure".into()))
        } else {
            Ok(())
        }
    }
}

impl StateStore for MemoryStore {
    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(inner.blobs.get(key).cloned())
    }

    fn save_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn append_order(&self, record: &OrderRecord) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.orders.push(record.clone());
        Ok(())
    }

    fn all_orders(&self) -> Result<Vec<OrderRecord>> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(inner.orders.clone())
    }

    fn increment_and_check_counter(&self) -> Result<(u64, bool)> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(inner.counter.advance())
    }

    fn mark_trained(&self, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.counter.last_training_timestamp = Some(at);
        Ok(())
    }
}
