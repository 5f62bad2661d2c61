use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use url::Url;

/// A served response eligible for replay.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Vec<u8>,
    pub status: u16,
    pub final_url: String,
}

/// Storage backend for the response cache. The crawler only ever talks to
/// this trait; sqlite/redis backends live outside the core and are injected
/// through the run options.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedResponse>;
    fn put(&self, key: String, response: CachedResponse);
}

/// Cache key for a request: the canonical URL with ignored query parameters
/// stripped. A pattern with a trailing `*` matches by prefix.
pub fn cache_key(url: &str, ignored_params: &[String]) -> String {
    let Ok(mut u) = Url::parse(url) else {
        return url.to_string();
    };
    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| !ignored(k, ignored_params))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(kept);
    }
    u.set_fragment(None);
    u.to_string()
}

fn ignored(param: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match p.strip_suffix('*') {
        Some(prefix) => param.starts_with(prefix),
        None => param == p,
    })
}

/// In-memory TTL cache, used by tests and the CLI `--cache` flag.
pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, CachedResponse)>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((stored, resp)) if stored.elapsed() < self.ttl => Some(resp.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: String, response: CachedResponse) {
        self.entries
            .lock()
            .unwrap()
            .insert(key, (Instant::now(), response));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_params_are_stripped() {
        let ignored = vec![String::from("utm_*"), String::from("fbclid")];
        assert_eq!(
            cache_key("http://h/a?utm_source=x&id=1&fbclid=z", &ignored),
            "http://h/a?id=1"
        );
        assert_eq!(cache_key("http://h/a?utm_source=x", &ignored), "http://h/a");
        assert_eq!(cache_key("http://h/a?id=1", &ignored), "http://h/a?id=1");
    }

    #[test]
    fn memory_cache_expires() {
        let cache = MemoryCache::new(Duration::from_millis(0));
        cache.put(
            "k".into(),
            CachedResponse {
                body: b"x".to_vec(),
                status: 200,
                final_url: "http://h/".into(),
            },
        );
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn memory_cache_serves_fresh_entries() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.put(
            "k".into(),
            CachedResponse {
                body: b"x".to_vec(),
                status: 200,
                final_url: "http://h/".into(),
            },
        );
        assert_eq!(cache.get("k").unwrap().body, b"x");
    }
}
