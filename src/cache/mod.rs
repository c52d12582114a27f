//! Cache (C2): a TTL-bounded, namespaced in-memory store.
//!
//! Not authoritative — a miss always triggers a fresh fetch upstream. Keyed
//! by `(namespace, key)` so unrelated namespaces can carry independent TTLs
//! without colliding on key shape.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

pub const NS_REPO_META: &str = "repo.meta";
pub const NS_REPO_PRS: &str = "repo.prs";
pub const NS_PR_CHECKS: &str = "pr.checks";
pub const NS_IDENTITY_IS_BOT: &str = "identity.is_bot";

fn default_ttl(namespace: &str) -> Duration {
    match namespace {
        NS_REPO_META => Duration::from_secs(600),
        NS_REPO_PRS => Duration::from_secs(120),
        NS_PR_CHECKS => Duration::from_secs(60),
        NS_IDENTITY_IS_BOT => Duration::from_secs(1800),
        _ => Duration::from_secs(60),
    }
}

struct Entry {
    value: Box<dyn Any + Send>,
    expires_at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

pub struct Cache {
    entries: Mutex<HashMap<(String, String), Entry>>,
    ttl_overrides: HashMap<String, Duration>,
    stats: Mutex<CacheStats>,
}

impl Cache {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl_overrides = config
            .ttls
            .iter()
            .map(|(ns, secs)| (ns.clone(), Duration::from_secs(*secs)))
            .collect();
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_overrides,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn ttl_for(&self, namespace: &str) -> Duration {
        self.ttl_overrides
            .get(namespace)
            .copied()
            .unwrap_or_else(|| default_ttl(namespace))
    }

    pub fn get<T: Clone + Send + 'static>(&self, namespace: &str, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        let map_key = (namespace.to_string(), key.to_string());
        let hit = match entries.get(&map_key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.value.downcast_ref::<T>().cloned()
            }
            Some(_) => {
                entries.remove(&map_key);
                None
            }
            None => None,
        };
        let mut stats = self.stats.lock().unwrap();
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    pub fn put<T: Send + 'static>(&self, namespace: &str, key: &str, value: T, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(namespace));
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            (namespace.to_string(), key.to_string()),
            Entry {
                value: Box::new(value),
                expires_at: Instant::now() + ttl,
            },
        );
        self.stats.lock().unwrap().size = entries.len();
    }

    /// Invalidate a single key, or every key in `namespace` when `key` is
    /// `None`.
    pub fn invalidate(&self, namespace: &str, key: Option<&str>) {
        let mut entries = self.entries.lock().unwrap();
        match key {
            Some(key) => {
                entries.remove(&(namespace.to_string(), key.to_string()));
            }
            None => entries.retain(|(ns, _), _| ns != namespace),
        }
        self.stats.lock().unwrap().size = entries.len();
    }

    /// Drop every expired entry. Lazy expiry on `get` already reclaims
    /// accessed keys; this reclaims ones that are never looked up again.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        self.stats.lock().unwrap().size = entries.len();
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn cache() -> Cache {
        Cache::new(&CacheConfig::default())
    }

    #[test]
    fn put_then_get_round_trips() {
        let c = cache();
        c.put(NS_REPO_META, "acme/web", 42u32, None);
        assert_eq!(c.get::<u32>(NS_REPO_META, "acme/web"), Some(42));
    }

    #[test]
    fn miss_on_unknown_key() {
        let c = cache();
        assert_eq!(c.get::<u32>(NS_REPO_META, "acme/web"), None);
        assert_eq!(c.stats().misses, 1);
    }

    #[test]
    fn ttl_expiry_is_exclusive_at_expires_at() {
        let c = cache();
        c.put(NS_PR_CHECKS, "acme/web#7", 1u32, Some(Duration::from_millis(20)));
        sleep(Duration::from_millis(40));
        assert_eq!(c.get::<u32>(NS_PR_CHECKS, "acme/web#7"), None);
    }

    #[test]
    fn invalidate_single_key_leaves_others() {
        let c = cache();
        c.put(NS_REPO_META, "a", 1u32, None);
        c.put(NS_REPO_META, "b", 2u32, None);
        c.invalidate(NS_REPO_META, Some("a"));
        assert_eq!(c.get::<u32>(NS_REPO_META, "a"), None);
        assert_eq!(c.get::<u32>(NS_REPO_META, "b"), Some(2));
    }

    #[test]
    fn invalidate_whole_namespace() {
        let c = cache();
        c.put(NS_REPO_META, "a", 1u32, None);
        c.put(NS_REPO_PRS, "a", 2u32, None);
        c.invalidate(NS_REPO_META, None);
        assert_eq!(c.get::<u32>(NS_REPO_META, "a"), None);
        assert_eq!(c.get::<u32>(NS_REPO_PRS, "a"), Some(2));
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let c = cache();
        c.put(NS_PR_CHECKS, "a", 1u32, Some(Duration::from_millis(10)));
        sleep(Duration::from_millis(30));
        c.sweep();
        assert_eq!(c.stats().size, 0);
    }

    #[test]
    fn configured_ttl_override_is_honored() {
        let mut config = CacheConfig::default();
        config.ttls.insert(NS_REPO_META.to_string(), 0);
        let c = Cache::new(&config);
        c.put(NS_REPO_META, "a", 1u32, None);
        sleep(Duration::from_millis(5));
        assert_eq!(c.get::<u32>(NS_REPO_META, "a"), None);
    }
}
