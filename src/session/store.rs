//! Artifact store for generated PDFs

use crate::convert::ConversionArtifact;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

struct StoreInner {
    lru: LruCache<String, Arc<ConversionArtifact>>,
    total_bytes: usize,
}

/// Byte-budgeted LRU store of conversion artifacts, keyed by artifact key
pub struct ArtifactStore {
    inner: Mutex<StoreInner>,
    max_bytes: usize,
}

impl ArtifactStore {
    /// Create a store with the given entry capacity and byte budget
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(StoreInner {
                lru: LruCache::new(capacity),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Store an artifact under a fresh key and return the key.
    /// Returns `None` when the artifact alone exceeds the byte budget.
    pub fn put(&self, artifact: Arc<ConversionArtifact>) -> Option<String> {
        let new_size = artifact.pdf.len();
        if new_size > self.max_bytes {
            tracing::debug!(
                bytes = new_size,
                max_bytes = self.max_bytes,
                "artifact too large to keep"
            );
            return None;
        }

        let mut inner = self.inner.lock();

        let key = loop {
            let key = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&key) {
                break key;
            }
        };

        while inner.total_bytes + new_size > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.pdf.len());
                }
                None => break,
            }
        }

        // push returns the entry evicted for capacity, if any
        if let Some((_, evicted)) = inner.lru.push(key.clone(), artifact) {
            inner.total_bytes = inner.total_bytes.saturating_sub(evicted.pdf.len());
        }
        inner.total_bytes += new_size;

        Some(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<ConversionArtifact>> {
        self.inner.lock().lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<ConversionArtifact>> {
        let mut inner = self.inner.lock();
        let removed = inner.lru.pop(key)?;
        inner.total_bytes = inner.total_bytes.saturating_sub(removed.pdf.len());
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    /// Total PDF bytes currently held
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(size: usize) -> Arc<ConversionArtifact> {
        Arc::new(ConversionArtifact {
            pdf: vec![0u8; size],
            file_name: "converted-images-1.pdf".to_string(),
            page_count: 1,
            pages: Vec::new(),
        })
    }

    #[test]
    fn test_store_basic_operations() {
        let store = ArtifactStore::new(10, 1024);
        assert!(store.is_empty());

        let key = store.put(artifact(3)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 3);
        assert!(store.contains(&key));
        assert_eq!(store.get(&key).unwrap().pdf.len(), 3);
        assert_eq!(key.len(), 36);
    }

    #[test]
    fn test_store_capacity_eviction() {
        let store = ArtifactStore::new(2, 1024);
        let k1 = store.put(artifact(1)).unwrap();
        let k2 = store.put(artifact(2)).unwrap();
        let k3 = store.put(artifact(3)).unwrap();

        assert!(!store.contains(&k1));
        assert!(store.contains(&k2));
        assert!(store.contains(&k3));
        assert_eq!(store.total_bytes(), 5);
    }

    #[test]
    fn test_store_byte_budget_eviction() {
        let store = ArtifactStore::new(10, 100);
        let k1 = store.put(artifact(30)).unwrap();
        let k2 = store.put(artifact(30)).unwrap();
        let k3 = store.put(artifact(30)).unwrap();
        assert_eq!(store.total_bytes(), 90);

        let k4 = store.put(artifact(30)).unwrap();
        assert!(!store.contains(&k1));
        assert!(store.contains(&k2));
        assert!(store.contains(&k3));
        assert!(store.contains(&k4));
        assert_eq!(store.total_bytes(), 90);
    }

    #[test]
    fn test_store_oversized_rejected() {
        let store = ArtifactStore::new(10, 50);
        assert!(store.put(artifact(100)).is_none());
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_store_remove() {
        let store = ArtifactStore::new(10, 1024);
        let key = store.put(artifact(7)).unwrap();
        assert!(store.remove(&key).is_some());
        assert!(!store.contains(&key));
        assert_eq!(store.total_bytes(), 0);
        assert!(store.remove(&key).is_none());
    }
}
