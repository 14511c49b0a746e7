//! Backends shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tiercache_core::cache::{CacheStore, MemoryBackend};
use tiercache_core::{CacheError, Result};

/// A [`MemoryBackend`] that can be switched off.
///
/// While down, every call fails with `BackendUnavailable`. Calls are
/// counted whether or not they succeed.
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that starts down.
    pub fn failing() -> Self {
        let backend = Self::default();
        backend.set_down(true);
        backend
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::backend_unavailable("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl_seconds).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn ping(&self) -> Result<String> {
        self.check()?;
        self.inner.ping().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Answers pings with something other than `PONG`.
#[derive(Default)]
pub struct WrongReplyBackend {
    inner: MemoryBackend,
}

#[async_trait]
impl CacheStore for WrongReplyBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        self.inner.set(key, value, ttl_seconds).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn ping(&self) -> Result<String> {
        Ok("LOADING".to_string())
    }

    fn name(&self) -> &'static str {
        "wrong-reply"
    }
}
