//! Process-local cache for LLM-generated manifest sets. Racy across worker
//! processes, but values are idempotent so a race only duplicates work, it
//! never corrupts output (see concurrency notes on the job runtime).

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct LlmCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Vec<Value>)>>,
}

impl LlmCache {
    pub fn new(ttl: Duration) -> Self {
        LlmCache { ttl, entries: RwLock::new(HashMap::new()) }
    }

    /// `SHA-256(compose_content || ":" || namespace)`.
    pub fn key(compose_content: &str, namespace: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(compose_content.as_bytes());
        hasher.update(b":");
        hasher.update(namespace.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Vec<Value>> {
        let entries = self.entries.read().await;
        let (inserted_at, manifests) = entries.get(key)?;
        if inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(manifests.clone())
    }

    pub async fn put(&self, key: String, manifests: Vec<Value>) {
        self.entries.write().await.insert(key, (Instant::now(), manifests));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn cache_key_equality_yields_byte_equal_manifests_within_ttl() {
        let cache = LlmCache::new(Duration::from_secs(3600));
        let key = LlmCache::key("services: {}", "pr-7-widget");
        cache.put(key.clone(), vec![json!({"kind": "Deployment"})]).await;
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit, vec![json!({"kind": "Deployment"})]);
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = LlmCache::new(Duration::from_millis(1));
        let key = LlmCache::key("services: {}", "pr-7-widget");
        cache.put(key.clone(), vec![json!({"kind": "Deployment"})]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[test]
    fn key_is_stable_for_same_inputs() {
        let a = LlmCache::key("x", "ns");
        let b = LlmCache::key("x", "ns");
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_for_different_namespace() {
        let a = LlmCache::key("x", "ns-a");
        let b = LlmCache::key("x", "ns-b");
        assert_ne!(a, b);
    }
}
