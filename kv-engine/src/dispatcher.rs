//! # Per-Engine TTL Dispatcher
//!
//! One [`Dispatcher`] per registered engine, owned by the [`crate::TtlManager`].
//! Grounded in `dispatcher_base.{h,cpp}`: a mapping from key to absolute
//! expiry second, plus a single-slot "deleting now" interlock that stops the
//! sweep's own call into `engine.del` from recursively tearing down the
//! mapping entry it is still iterating over.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use kv_common::Key;

use crate::clock::now_secs;
use crate::engine::StorageEngine;

pub struct Dispatcher {
    engine: Weak<dyn StorageEngine>,
    mapping: Mutex<HashMap<Key, u64>>,
    deleting_now: Mutex<Option<Key>>,
}

impl Dispatcher {
    pub fn new(engine: Weak<dyn StorageEngine>) -> Self {
        Dispatcher {
            engine,
            mapping: Mutex::new(HashMap::new()),
            deleting_now: Mutex::new(None),
        }
    }

    /// Inserts or overwrites `key`'s deadline, then immediately sweeps —
    /// defensive against a caller arming a key whose ttl is already past
    /// due.
    pub fn arm(&self, key: Key, ttl_seconds: u64) {
        let expire_at = now_secs() + ttl_seconds;
        self.mapping.lock().insert(key, expire_at);
        self.sweep();
    }

    /// Removes `key` from the mapping, unless `key` is the one the sweep is
    /// currently deleting — in which case the sweep's own bookkeeping will
    /// remove it, and this call is a no-op.
    pub fn disarm(&self, key: &str) {
        if self.deleting_now.lock().as_deref() == Some(key) {
            return;
        }
        self.mapping.lock().remove(key);
    }

    /// Collects all keys whose deadline has passed, then deletes each one
    /// through the engine's normal `del` entry point.
    pub fn sweep(&self) {
        let now = now_secs();
        let due: Vec<Key> = {
            let mapping = self.mapping.lock();
            mapping
                .iter()
                .filter(|(_, &expire_at)| expire_at <= now)
                .map(|(key, _)| key.clone())
                .collect()
        };
        if due.is_empty() {
            return;
        }
        let Some(engine) = self.engine.upgrade() else {
            return;
        };

        for key in due {
            *self.deleting_now.lock() = Some(key.clone());
            if engine.del(&key).is_ok() {
                tracing::trace!(key = %key, "ttl sweep evicted key");
            }
            self.mapping.lock().remove(&key);
            *self.deleting_now.lock() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_common::Value;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEngine {
        deleted: Mutex<Vec<Key>>,
        del_calls: AtomicUsize,
    }

    impl StorageEngine for FakeEngine {
        fn id(&self) -> u64 {
            1
        }
        fn set(&self, _key: Key, _value: Value, _ttl: i64) -> kv_common::StoreResult<()> {
            Ok(())
        }
        fn get(&self, _key: &str) -> Option<Value> {
            None
        }
        fn exists(&self, _key: &str) -> bool {
            false
        }
        fn del(&self, key: &str) -> kv_common::StoreResult<()> {
            self.del_calls.fetch_add(1, Ordering::SeqCst);
            self.deleted.lock().push(key.to_string());
            Ok(())
        }
        fn update(
            &self,
            _key: &str,
            _value: &Value,
            _ttl: i64,
            _mask: kv_common::ParamMask,
        ) -> kv_common::StoreResult<()> {
            Ok(())
        }
        fn rename(&self, _old: &str, _new: &str) -> kv_common::StoreResult<()> {
            Ok(())
        }
        fn ttl(&self, _key: &str) -> kv_common::StoreResult<i64> {
            Ok(0)
        }
        fn keys(&self) -> Vec<Key> {
            Vec::new()
        }
        fn find(&self, _value: &Value, _ttl: i64, _mask: kv_common::ParamMask) -> Vec<Key> {
            Vec::new()
        }
        fn showall(&self) -> Vec<(Key, Value)> {
            Vec::new()
        }
        fn import(&self, _path: &Path) -> kv_common::StoreResult<usize> {
            Ok(0)
        }
        fn export(&self, _path: &Path) -> kv_common::StoreResult<usize> {
            Ok(0)
        }
        fn size(&self) -> usize {
            0
        }
    }

    #[test]
    fn arm_then_sweep_deletes_due_key() {
        let concrete = Arc::new(FakeEngine {
            deleted: Mutex::new(Vec::new()),
            del_calls: AtomicUsize::new(0),
        });
        let dyn_engine: Arc<dyn StorageEngine> = concrete.clone();
        let dispatcher = Dispatcher::new(Arc::downgrade(&dyn_engine));

        dispatcher.arm("k1".to_string(), 0);

        assert_eq!(concrete.del_calls.load(Ordering::SeqCst), 1);
        assert_eq!(concrete.deleted.lock().as_slice(), ["k1"]);
        assert!(dispatcher.mapping.lock().is_empty());
    }

    #[test]
    fn disarm_interlock_blocks_reentrant_removal() {
        let engine: Arc<dyn StorageEngine> = Arc::new(FakeEngine {
            deleted: Mutex::new(Vec::new()),
            del_calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(Arc::downgrade(&engine));
        dispatcher.mapping.lock().insert("k1".to_string(), 0);
        *dispatcher.deleting_now.lock() = Some("k1".to_string());

        dispatcher.disarm("k1");

        assert!(dispatcher.mapping.lock().contains_key("k1"));
    }

    #[test]
    fn disarm_removes_unrelated_key() {
        let engine: Arc<dyn StorageEngine> = Arc::new(FakeEngine {
            deleted: Mutex::new(Vec::new()),
            del_calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(Arc::downgrade(&engine));
        dispatcher.mapping.lock().insert("k1".to_string(), 0);

        dispatcher.disarm("k1");

        assert!(!dispatcher.mapping.lock().contains_key("k1"));
    }
}
