//! RocksDB storage layer

use crate::errors::StorageError;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref()).map_err(|e| {
            StorageError::DatabaseOpenFailed(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open, wiping any existing data first when `clear` is set
    pub fn open_with_clear<P: AsRef<Path>>(path: P, clear: bool) -> Result<Self, StorageError> {
        if clear && path.as_ref().exists() {
            std::fs::remove_dir_all(path.as_ref()).map_err(|e| {
                StorageError::DatabaseOpenFailed(format!("clear {}: {}", path.as_ref().display(), e))
            })?;
        }
        Self::new(path)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    /// All items land together or not at all
    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> Result<(), StorageError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    /// Rows whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_batch_and_prefix_scan() {
        let dir = TempDir::new().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();

        storage
            .batch_write(&[
                (b"bet:a:1".to_vec(), b"one".to_vec()),
                (b"bet:a:2".to_vec(), b"two".to_vec()),
                (b"bet:b:1".to_vec(), b"other".to_vec()),
            ])
            .unwrap();
        storage.put(b"period:a", b"row").unwrap();

        let rows = storage.scan_prefix(b"bet:a:").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].1, b"two".to_vec());
        assert_eq!(storage.get(b"period:a").unwrap(), Some(b"row".to_vec()));
        assert_eq!(storage.get(b"period:z").unwrap(), None);
    }

    #[test]
    fn test_clear_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let storage = OptimizedStorage::new(&path).unwrap();
            storage.put(b"k", b"v").unwrap();
        }
        let storage = OptimizedStorage::open_with_clear(&path, true).unwrap();
        assert_eq!(storage.get(b"k").unwrap(), None);
    }
}
