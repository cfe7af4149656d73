//! Registry of hosts known to be reached over plain HTTP.
//!
//! The set is advisory: it only decides whether a CONNECT tunnel logs the
//! "switch to http://" warning. Losing an entry never affects relaying.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe set of hostnames, shared by every connection.
///
/// Cloning is cheap and yields a handle to the same set. Hostnames are
/// stored exactly as received (case-sensitive).
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl HostRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-seeded with the given hosts.
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(Mutex::new(hosts.into_iter().map(Into::into).collect())),
        }
    }

    /// Whether `host` has been registered.
    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        self.lock().contains(host)
    }

    /// Register `host`. Returns `true` if it was not already present.
    pub fn add(&self, host: &str) -> bool {
        let mut hosts = self.lock();
        if hosts.contains(host) {
            return false;
        }
        hosts.insert(host.to_string())
    }

    /// Number of registered hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted copy of the registered hosts.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.lock().iter().cloned().collect();
        hosts.sort();
        hosts
    }

    // The set has no invariants spanning entries, so a panic in another
    // holder cannot leave it inconsistent.
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let registry = HostRegistry::new();
        assert!(registry.add("indexer.example"));
        assert!(!registry.add("indexer.example"));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("indexer.example"));
    }

    #[test]
    fn test_hosts_are_case_sensitive() {
        let registry = HostRegistry::with_hosts(["Indexer.Example"]);
        assert!(registry.contains("Indexer.Example"));
        assert!(!registry.contains("indexer.example"));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = HostRegistry::with_hosts(["prowlarr.servarr.com"]);
        let other = registry.clone();
        other.add("a.example");
        assert_eq!(registry.snapshot(), vec!["a.example", "prowlarr.servarr.com"]);
    }

    #[test]
    fn test_concurrent_adds_have_no_lost_updates() {
        let registry = HostRegistry::new();
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        // Every thread races on the same 50 hosts plus its own 50.
                        registry.add(&format!("shared{}.example", i % 50));
                        registry.add(&format!("t{}-{}.example", t, i % 50));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.len(), 50 + 8 * 50);
    }
}
