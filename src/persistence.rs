//! Persistence of failing variants for replay across runs
//!
//! Every failing variant can be written to a directory as one JSON object per
//! file. On the next run the saved variants are read back (newest first) and
//! replayed before normal iteration starts, so a regression is hit on the very
//! first tests.
//!
//! # Architecture
//!
//! - `VariantCodec` trait: converts an argument map to and from JSON
//! - `JsonCodec`: plain object of argument name to value, for serde types
//! - `FnCodec`: caller-supplied conversion to a custom JSON shape
//! - `ErrorVariantStore`: directory storage with atomic writes and
//!   timestamp file names (`YYYY-MM-DD_HH-mm-ss.json`, UTC)

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::args::Args;

/// Type alias for persistence operation results
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Error types for saved-variant storage
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Conversion between argument maps and their stored JSON form
pub trait VariantCodec<V>: Send + Sync {
    fn encode(&self, args: &Args<V>) -> PersistenceResult<Value>;

    fn decode(&self, json: Value) -> PersistenceResult<HashMap<String, V>>;
}

/// Stores the argument map itself as a JSON object
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V: Serialize + DeserializeOwned> VariantCodec<V> for JsonCodec {
    fn encode(&self, args: &Args<V>) -> PersistenceResult<Value> {
        serde_json::to_value(args).map_err(|e| PersistenceError::Codec(e.to_string()))
    }

    fn decode(&self, json: Value) -> PersistenceResult<HashMap<String, V>> {
        serde_json::from_value(json).map_err(|e| PersistenceError::Codec(e.to_string()))
    }
}

type EncodeFn<V> = Box<dyn Fn(&Args<V>) -> Result<Value, String> + Send + Sync>;
type DecodeFn<V> = Box<dyn Fn(Value) -> Result<HashMap<String, V>, String> + Send + Sync>;

/// Codec built from a pair of conversion closures
pub struct FnCodec<V> {
    encode: EncodeFn<V>,
    decode: DecodeFn<V>,
}

impl<V> FnCodec<V> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&Args<V>) -> Result<Value, String> + Send + Sync + 'static,
        D: Fn(Value) -> Result<HashMap<String, V>, String> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

impl<V> VariantCodec<V> for FnCodec<V> {
    fn encode(&self, args: &Args<V>) -> PersistenceResult<Value> {
        (self.encode)(args).map_err(PersistenceError::Codec)
    }

    fn decode(&self, json: Value) -> PersistenceResult<HashMap<String, V>> {
        (self.decode)(json).map_err(PersistenceError::Codec)
    }
}

/// File name (relative to the store directory) for a variant saved at a given time
pub type FileNameFn = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

/// Default file name: UTC timestamp with second precision
pub fn timestamp_file_name(now: DateTime<Utc>) -> String {
    format!("{}.json", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Sort key of a stored file: base name, then the `_N` collision suffix
fn save_order(path: &Path) -> (String, u64) {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some((base, suffix)) = stem.rsplit_once('_') {
        if suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = suffix.parse() {
                return (base.to_string(), n);
            }
        }
    }
    (stem, 0)
}

/// A variant read back from the store
#[derive(Debug, Clone)]
pub struct SavedVariant<V> {
    pub path: PathBuf,
    pub values: HashMap<String, V>,
}

/// Directory of saved failing variants
pub struct ErrorVariantStore<V> {
    dir: PathBuf,
    codec: Arc<dyn VariantCodec<V>>,
    file_name: FileNameFn,
}

impl<V> Clone for ErrorVariantStore<V> {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            codec: Arc::clone(&self.codec),
            file_name: Arc::clone(&self.file_name),
        }
    }
}

impl<V> fmt::Debug for ErrorVariantStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorVariantStore")
            .field("dir", &self.dir)
            .field("codec", &"<codec>")
            .finish()
    }
}

impl<V: Serialize + DeserializeOwned + 'static> ErrorVariantStore<V> {
    /// Store plain JSON argument maps in `dir`
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self::with_codec(dir, JsonCodec)
    }
}

impl<V: 'static> ErrorVariantStore<V> {
    /// Store variants in `dir` using a custom JSON shape
    pub fn with_codec<P, C>(dir: P, codec: C) -> Self
    where
        P: AsRef<Path>,
        C: VariantCodec<V> + 'static,
    {
        Self {
            dir: dir.as_ref().to_path_buf(),
            codec: Arc::new(codec),
            file_name: Arc::new(timestamp_file_name),
        }
    }

    /// Override how new files are named
    pub fn with_file_name<F>(mut self, file_name: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> String + Send + Sync + 'static,
    {
        self.file_name = Arc::new(file_name);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every saved variant, newest first.
    ///
    /// A missing directory holds no variants.
    pub fn load(&self) -> PersistenceResult<Vec<SavedVariant<V>>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        if !self.dir.is_dir() {
            return Err(PersistenceError::NotADirectory(self.dir.clone()));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        // timestamp names sort chronologically, collision suffixes numerically
        paths.sort_by_cached_key(|path| std::cmp::Reverse(save_order(path)));

        let mut variants = Vec::with_capacity(paths.len());
        for path in paths {
            let text = fs::read_to_string(&path)?;
            let json: Value = serde_json::from_str(&text).map_err(|source| PersistenceError::Json {
                path: path.clone(),
                source,
            })?;
            let values = self.codec.decode(json)?;
            variants.push(SavedVariant { path, values });
        }
        log::debug!("Loaded {} saved variants from {}", variants.len(), self.dir.display());
        Ok(variants)
    }

    /// Write a failing variant to a new, uniquely named file
    pub fn save(&self, args: &Args<V>) -> PersistenceResult<PathBuf> {
        let json = self.codec.encode(args)?;
        let text = serde_json::to_string_pretty(&json)
            .map_err(|e| PersistenceError::Codec(e.to_string()))?;

        let path = self.unique_path((self.file_name)(Utc::now()));
        self.atomic_write(&path, text.as_bytes())?;
        log::info!("Saved failing variant to {}", path.display());
        Ok(path)
    }

    fn unique_path(&self, file_name: String) -> PathBuf {
        let candidate = self.dir.join(&file_name);
        if !candidate.exists() {
            return candidate;
        }
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, extension)) => (stem.to_string(), format!(".{}", extension)),
            None => (file_name.clone(), String::new()),
        };
        (1..)
            .map(|n| self.dir.join(format!("{}_{}{}", stem, n, extension)))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }

    /// Atomic write operation using temporary file + rename
    fn atomic_write(&self, path: &Path, data: &[u8]) -> PersistenceResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let mut file = BufWriter::new(File::create(&temp_path)?);
            file.write_all(data)?;
            file.flush()?;
        }

        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
