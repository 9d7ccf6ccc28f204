//! Named rule locks.
//!
//! Rules may declare locks, keyed by build path; two rules declaring the
//! same lock never execute concurrently. Locks are acquired in the order
//! they are listed, which is the caller's tool for avoiding deadlocks
//! between rules that share several locks.

use std::sync::Arc;

use dashmap::DashMap;
use fxhash::FxBuildHasher;
use tokio::sync::Mutex;

use crate::path::BuildPath;

/// The process-wide table of named locks.
#[derive(Debug, Default)]
pub struct LockMap {
    locks: DashMap<BuildPath, Arc<Mutex<()>>, FxBuildHasher>,
}

impl LockMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, name: &BuildPath) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `body` while holding every lock in `names`, acquired in list
    /// order and released in reverse.
    pub async fn with_locks<T>(
        &self,
        names: &[BuildPath],
        body: impl Future<Output = T>,
    ) -> T {
        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            guards.push(self.get(name).lock_owned().await);
        }
        let result = body.await;
        drop(guards);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_lock_serializes() {
        let locks = Arc::new(LockMap::new());
        let lock_name = BuildPath::new("default/.lock").unwrap();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let lock_name = lock_name.clone();
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                locks
                    .with_locks(std::slice::from_ref(&lock_name), async {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(
                            std::time::Duration::from_millis(5),
                        )
                        .await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_locks_is_a_no_op() {
        let locks = LockMap::new();
        let out = locks.with_locks(&[], async { 5 }).await;
        assert_eq!(out, 5);
    }
}
