use dashmap::DashMap;

/// Process-local short_code → original_url map (C3). Concurrent-safe,
/// read-optimised, never evicts (§4.1): links are immutable, so a stale
/// entry can never exist once written.
#[derive(Default)]
pub struct L1Cache {
    inner: DashMap<String, String>,
}

impl L1Cache {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn get(&self, short_code: &str) -> Option<String> {
        self.inner.get(short_code).map(|entry| entry.value().clone())
    }

    /// Publish unconditionally — last-writer-wins is acceptable since the
    /// value for a given key is stable once written (§5 shared-resource
    /// policy).
    pub fn insert(&self, short_code: String, original_url: String) {
        self.inner.insert(short_code, original_url);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_after_insert() {
        let cache = L1Cache::new();
        assert_eq!(cache.get("abc123"), None);
        cache.insert("abc123".into(), "https://example.com".into());
        assert_eq!(cache.get("abc123").as_deref(), Some("https://example.com"));
    }

    #[test]
    fn last_writer_wins_is_a_noop_for_stable_values() {
        let cache = L1Cache::new();
        cache.insert("abc123".into(), "https://example.com".into());
        cache.insert("abc123".into(), "https://example.com".into());
        assert_eq!(cache.len(), 1);
    }
}
