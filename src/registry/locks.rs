//! Per-entity advisory locks keyed by UUID.
//!
//! A busy-set guarded by a mutex plus a condvar: `lock(key)` waits until nobody holds
//! `key`, marks it busy and hands back an owned guard. Guards are `'static` so that a
//! timed-out request can leave its guard with the background thread finishing the work.
//!
//! Порядок: сначала entity-локи, потом глобальный RwLock состояния. Никогда наоборот.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct EntityLocks {
    busy: Mutex<HashSet<String>>,
    cv: Condvar,
}

impl EntityLocks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until `key` is free, then take it.
    pub(crate) fn lock(self: &Arc<Self>, key: &str) -> Result<EntityGuard> {
        let mut busy = self.busy_set()?;
        while busy.contains(key) {
            busy = self
                .cv
                .wait(busy)
                .map_err(|_| Error::internal("entity lock table poisoned"))?;
        }
        busy.insert(key.to_string());
        Ok(EntityGuard {
            locks: Arc::clone(self),
            key: key.to_string(),
        })
    }

    /// Take several keys in sorted order (deadlock-free for callers that all use it).
    pub(crate) fn lock_many(self: &Arc<Self>, keys: &[String]) -> Result<Vec<EntityGuard>> {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut out = Vec::with_capacity(sorted.len());
        for k in sorted {
            out.push(self.lock(k)?);
        }
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self, key: &str) -> bool {
        self.busy_set().map(|b| b.contains(key)).unwrap_or(false)
    }

    fn busy_set(&self) -> Result<MutexGuard<'_, HashSet<String>>> {
        self.busy
            .lock()
            .map_err(|_| Error::internal("entity lock table poisoned"))
    }
}

/// Held for the whole operation on one entity, driver call included.
pub(crate) struct EntityGuard {
    locks: Arc<EntityLocks>,
    key: String,
}

impl EntityGuard {
    #[cfg(test)]
    pub(crate) fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        // отравленный мьютекс всё равно освобождаем, иначе ключ зависнет навсегда
        let mut busy = match self.locks.busy.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        busy.remove(&self.key);
        drop(busy);
        self.locks.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_key_is_exclusive_other_keys_are_not() {
        let locks = EntityLocks::new();
        let g1 = locks.lock("a").unwrap();
        let g2 = locks.lock("b").unwrap();
        assert!(locks.is_locked("a"));
        assert_eq!(g2.key(), "b");

        let inside = Arc::new(AtomicUsize::new(0));
        let l2 = Arc::clone(&locks);
        let in2 = Arc::clone(&inside);
        let h = thread::spawn(move || {
            let _g = l2.lock("a").unwrap();
            in2.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(inside.load(Ordering::SeqCst), 0, "second holder must wait");
        drop(g1);
        h.join().unwrap();
        assert_eq!(inside.load(Ordering::SeqCst), 1);
        drop(g2);
        assert!(!locks.is_locked("a"));
        assert!(!locks.is_locked("b"));
    }

    #[test]
    fn lock_many_dedups() {
        let locks = EntityLocks::new();
        let gs = locks
            .lock_many(&["b".into(), "a".into(), "b".into()])
            .unwrap();
        assert_eq!(gs.len(), 2);
        assert_eq!(gs[0].key(), "a");
    }
}
