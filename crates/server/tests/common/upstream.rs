//! Fake upstream resolver.

use async_trait::async_trait;
use easel_server::{UpstreamError, UpstreamResolver};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Resolver that counts calls, optionally sleeps, and fails chosen keys.
///
/// Successful lookups resolve to `https://img.example/{slug}.jpg` where the
/// slug is the lowercased key with spaces replaced by dashes.
#[derive(Default)]
pub struct FakeResolver {
    calls: AtomicUsize,
    calls_by_key: Mutex<HashMap<String, usize>>,
    delay: Duration,
    failing: HashSet<String>,
}

#[allow(dead_code)]
impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every lookup.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make lookups for these keys (case-insensitive) fail with NotFound.
    pub fn failing(mut self, keys: &[&str]) -> Self {
        self.failing
            .extend(keys.iter().map(|key| key.trim().to_lowercase()));
        self
    }

    /// Total lookups so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Lookups for one key (case-insensitive) so far.
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls_by_key
            .lock()
            .unwrap()
            .get(&key.trim().to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn url_for(key: &str) -> String {
        format!(
            "https://img.example/{}.jpg",
            key.trim().to_lowercase().replace(' ', "-")
        )
    }
}

#[async_trait]
impl UpstreamResolver for FakeResolver {
    async fn resolve(&self, key: &str) -> Result<String, UpstreamError> {
        if key.trim().is_empty() {
            return Err(UpstreamError::BlankKey);
        }

        let normalized = key.trim().to_lowercase();
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_key
            .lock()
            .unwrap()
            .entry(normalized.clone())
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(&normalized) {
            return Err(UpstreamError::NotFound(key.to_string()));
        }
        Ok(Self::url_for(key))
    }
}

/// Resolver that records the exact keys it receives.
#[derive(Default)]
pub struct RecordingResolver {
    seen: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys passed to `resolve`, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamResolver for RecordingResolver {
    async fn resolve(&self, key: &str) -> Result<String, UpstreamError> {
        self.seen.lock().unwrap().push(key.to_string());
        Ok(format!("https://img.example/{}.jpg", key.replace(' ', "-")))
    }
}
