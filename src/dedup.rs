#![forbid(unsafe_code)]

//! Process-wide registry of video ids already written to some batch.
//!
//! The set only grows and lives for one run. Every read and write goes through
//! one mutex, so concurrent workers observe each admission atomically.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns `true` if it was absent; `false` otherwise.
    pub fn admit(&self, id: &str) -> bool {
        let mut seen = self.inner.lock();
        if seen.contains(id) {
            return false;
        }
        seen.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains(id)
    }

    /// Ids from `ids` that are not yet registered, in input order. One lock
    /// acquisition for the whole page.
    pub fn unseen<'a, I>(&self, ids: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let seen = self.inner.lock();
        ids.into_iter().filter(|id| !seen.contains(*id)).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn admit_is_true_once_per_id() {
        let seen = SeenSet::new();
        assert!(seen.admit("a"));
        assert!(!seen.admit("a"));
        assert!(seen.admit("b"));
        assert_eq!(seen.len(), 2);
        assert!(seen.contains("a"));
        assert!(!seen.contains("c"));
    }

    #[test]
    fn unseen_filters_registered_ids_in_order() {
        let seen = SeenSet::new();
        seen.admit("b");
        let ids = ["a", "b", "c"];
        assert_eq!(seen.unseen(ids.iter().copied()), vec!["a", "c"]);
    }

    #[test]
    fn clones_share_state() {
        let seen = SeenSet::new();
        let other = seen.clone();
        assert!(seen.admit("x"));
        assert!(!other.admit("x"));
    }

    #[test]
    fn concurrent_admission_succeeds_exactly_once() {
        let seen = SeenSet::new();
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = seen.clone();
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        if seen.admit(&format!("id-{i}")) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 200);
        assert_eq!(seen.len(), 200);
    }
}
