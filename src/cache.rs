//! Memoization of expensive computations, like time series extraction, on disk.
//!
//! Results are keyed by a content hash of everything they depend on: the configuration of the
//! operation, the data it was applied to, and the identity of the input files. Runs of the same
//! analysis therefore re-use earlier results. There is no locking, concurrent runs writing the same
//! cache directory are not supported.

use byteordered::ByteOrdered;
use log::{debug, warn};
use ndarray::Array2;
use serde::Serialize;
use sha2::{Digest, Sha256};

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{ConnectomeError, Result};
use crate::util::{checked_num_values, value_buffer};

const CACHE_FILE_MAGIC: &[u8; 4] = b"NCMX";


/// The key of a memoized result: a hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start building a key for results of the named operation.
    pub fn builder(operation: &str) -> CacheKeyBuilder {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update(&[0u8]);
        CacheKeyBuilder { hasher }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Accumulates everything a result depends on into a [`CacheKey`].
pub struct CacheKeyBuilder {
    hasher: Sha256,
}

impl CacheKeyBuilder {
    pub fn bytes(mut self, bytes: &[u8]) -> CacheKeyBuilder {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Add a serializable value, like an operator configuration.
    pub fn json<T: Serialize>(self, value: &T) -> Result<CacheKeyBuilder> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.bytes(&encoded))
    }

    /// Add the identity of a file: its absolute path, size and modification time.
    ///
    /// The content is not hashed, input images can be large.
    pub fn file<P: AsRef<Path>>(self, path: P) -> Result<CacheKeyBuilder> {
        let path = path.as_ref();
        let abs = fs::canonicalize(path)?;
        let meta = fs::metadata(&abs)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let identity = format!("{}|{}|{}", abs.to_string_lossy(), meta.len(), mtime);
        Ok(self.bytes(identity.as_bytes()))
    }

    pub fn finish(self) -> CacheKey {
        CacheKey(hex::encode(self.hasher.finalize()))
    }
}


/// Get-or-compute access to memoized matrices.
pub trait Memory {
    /// Return the stored result for `key`, or run `compute`, store its result and return it.
    fn get_or_compute(
        &self,
        key: &CacheKey,
        compute: &mut dyn FnMut() -> Result<Array2<f64>>,
    ) -> Result<Array2<f64>>;
}

/// A [`Memory`] that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemory;

impl Memory for NoMemory {
    fn get_or_compute(
        &self,
        _key: &CacheKey,
        compute: &mut dyn FnMut() -> Result<Array2<f64>>,
    ) -> Result<Array2<f64>> {
        compute()
    }
}

/// A [`Memory`] that stores results as binary files in a directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskMemory {
    dir: PathBuf,
}

impl DiskMemory {
    /// Use `dir` as the cache location. It is created on first write.
    pub fn new<P: Into<PathBuf>>(dir: P) -> DiskMemory {
        DiskMemory { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.bin", key.as_str()))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    fn load(&self, path: &Path) -> Result<Array2<f64>> {
        let mut input = ByteOrdered::le(BufReader::new(File::open(path)?));
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != CACHE_FILE_MAGIC {
            return Err(ConnectomeError::ShapeMismatch(format!("not a cache file: {}", path.display())));
        }
        let rows = input.read_u64()? as usize;
        let cols = input.read_u64()? as usize;
        let num_values = checked_num_values(&[rows, cols])
            .ok_or_else(|| ConnectomeError::ShapeMismatch(format!("invalid matrix size in cache file {}", path.display())))?;
        let mut values: Vec<f64> = value_buffer(num_values);
        for _ in 0..num_values {
            values.push(input.read_f64()?);
        }
        Array2::from_shape_vec((rows, cols), values).map_err(|e| ConnectomeError::ShapeMismatch(e.to_string()))
    }

    fn store(&self, path: &Path, matrix: &Array2<f64>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Readers only ever see complete entries.
        let tmp_path = path.with_extension("tmp");
        {
            let mut output = ByteOrdered::le(BufWriter::new(File::create(&tmp_path)?));
            output.write_all(CACHE_FILE_MAGIC)?;
            output.write_u64(matrix.nrows() as u64)?;
            output.write_u64(matrix.ncols() as u64)?;
            for v in matrix.iter() {
                output.write_f64(*v)?;
            }
            output.flush()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl Memory for DiskMemory {
    fn get_or_compute(
        &self,
        key: &CacheKey,
        compute: &mut dyn FnMut() -> Result<Array2<f64>>,
    ) -> Result<Array2<f64>> {
        let path = self.entry_path(key);
        if path.is_file() {
            match self.load(&path) {
                Ok(matrix) => {
                    debug!("Cache hit for {}.", key.as_str());
                    return Ok(matrix);
                }
                Err(e) => warn!("Ignoring unreadable cache entry {}: {}", path.display(), e),
            }
        }
        debug!("Cache miss for {}, computing.", key.as_str());
        let matrix = compute()?;
        self.store(&path, &matrix)?;
        Ok(matrix)
    }
}
