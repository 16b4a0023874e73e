//! Document blob storage.
//!
//! Envelope documents and previews are opaque blobs keyed by path-like
//! strings ("documents/<slug>.pdf"). The trait mirrors the minimal surface
//! an S3-compatible backend provides.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Blob storage behind the workflow engine.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectError>;

    /// Keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectError>;

    /// A time-limited fetch URL for a key. The memory backend fakes one.
    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, ObjectError>;
}

/// Process-local object store for development and tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectError> {
        self.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectError> {
        let mut keys: Vec<String> = self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, ObjectError> {
        if !self.lock().contains_key(key) {
            return Err(ObjectError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{}?ttl={}", key, ttl_secs))
    }
}
