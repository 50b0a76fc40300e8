//! # Fixed-Bucket Hash Engine
//!
//! A 255-bucket separate-chaining table behind one `parking_lot::Mutex`,
//! grounded in `examples/original_source/src/model/hash_table/hash_table.cpp`.
//! Bucket index is the checksum-style sum of the key's bytes, taken modulo
//! 256 and clamped into the array width — the clamp exists because the sum
//! is computed in an 8-bit-wide accumulator upstream and can itself land on
//! 255, one past a 255-length array in the original; [`bucket_index`]
//! reproduces the observable ordering while staying in-bounds.
//!
//! No resize, no rehash: the bucket count is a fixed design parameter, not a
//! load-factor-driven one.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use kv_common::{Key, ParamMask, StoreError, StoreResult, Value};

use crate::clock::now_secs;
use crate::engine::{apply_mask, entry_matches, is_expired, next_engine_id, Entry, EngineId, StorageEngine};
use crate::ttl_manager::TtlManager;

const BUCKET_COUNT: usize = 255;

fn bucket_index(key: &str) -> usize {
    let sum: u32 = key.bytes().map(u32::from).sum();
    ((sum % 256) as usize).min(BUCKET_COUNT - 1)
}

struct Inner {
    buckets: Vec<Vec<(Key, Entry)>>,
    size: usize,
}

/// Chained hash table engine. Construct with [`HashEngine::new`]; every
/// instance registers itself with the process-wide [`TtlManager`] and
/// deregisters on drop.
pub struct HashEngine {
    id: EngineId,
    inner: Mutex<Inner>,
}

impl HashEngine {
    pub fn new() -> Arc<HashEngine> {
        let id = next_engine_id();
        let engine = Arc::new(HashEngine {
            id,
            inner: Mutex::new(Inner {
                buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
                size: 0,
            }),
        });
        let weak: std::sync::Weak<dyn StorageEngine> = Arc::downgrade(&engine);
        TtlManager::handle().register(id, weak);
        engine
    }

    fn find_in_chain<'a>(chain: &'a [(Key, Entry)], key: &str) -> Option<usize> {
        chain.iter().position(|(k, _)| k == key)
    }

    /// Removes an entry if it is present and expired, without touching the
    /// TTL manager (the sweep already owns that half of the teardown).
    fn evict_if_expired(inner: &mut Inner, key: &str) {
        let idx = bucket_index(key);
        let chain = &mut inner.buckets[idx];
        if let Some(pos) = Self::find_in_chain(chain, key) {
            if is_expired(&chain[pos].1, now_secs()) {
                chain.remove(pos);
                inner.size -= 1;
            }
        }
    }
}

impl Drop for HashEngine {
    fn drop(&mut self) {
        TtlManager::handle().unregister(self.id);
    }
}

impl StorageEngine for HashEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    fn set(&self, key: Key, value: Value, ttl: i64) -> StoreResult<()> {
        let expire_at = if ttl > 0 {
            Some(now_secs() + ttl as u64)
        } else {
            None
        };

        {
            let mut inner = self.inner.lock();
            Self::evict_if_expired(&mut inner, &key);
            let idx = bucket_index(&key);
            if Self::find_in_chain(&inner.buckets[idx], &key).is_some() {
                return Err(StoreError::KeyAlreadyExists);
            }
            inner.buckets[idx].push((key.clone(), Entry { value, expire_at }));
            inner.size += 1;
        }

        if let Some(expire_at) = expire_at {
            TtlManager::handle().arm(self.id, key, expire_at - now_secs());
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        Self::evict_if_expired(&mut inner, key);
        let idx = bucket_index(key);
        Self::find_in_chain(&inner.buckets[idx], key).map(|pos| inner.buckets[idx][pos].1.value.clone())
    }

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn del(&self, key: &str) -> StoreResult<()> {
        let had_deadline = {
            let mut inner = self.inner.lock();
            let idx = bucket_index(key);
            let chain = &mut inner.buckets[idx];
            let Some(pos) = Self::find_in_chain(chain, key) else {
                return Err(StoreError::KeyNotFound);
            };
            let entry = chain.remove(pos);
            inner.size -= 1;
            entry.1.expire_at.is_some()
        };
        if had_deadline {
            TtlManager::handle().disarm(self.id, key);
        }
        Ok(())
    }

    fn update(&self, key: &str, value: &Value, ttl: i64, mask: ParamMask) -> StoreResult<()> {
        let new_expire_at = {
            let mut inner = self.inner.lock();
            Self::evict_if_expired(&mut inner, key);
            let idx = bucket_index(key);
            let chain = &mut inner.buckets[idx];
            let Some(pos) = Self::find_in_chain(chain, key) else {
                return Err(StoreError::KeyNotFound);
            };
            let entry = &mut chain[pos].1;
            apply_mask(&mut entry.value, value, mask);

            if mask.contains(ParamMask::TTL) {
                entry.expire_at = if ttl > 0 {
                    Some(now_secs() + ttl as u64)
                } else {
                    None
                };
            }
            entry.expire_at
        };

        if mask.contains(ParamMask::TTL) {
            match new_expire_at {
                Some(expire_at) => {
                    TtlManager::handle().arm(self.id, key.to_string(), expire_at.saturating_sub(now_secs()));
                }
                None => TtlManager::handle().disarm(self.id, key),
            }
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> StoreResult<()> {
        let entry = {
            let mut inner = self.inner.lock();
            Self::evict_if_expired(&mut inner, old);
            let idx = bucket_index(old);
            let Some(pos) = Self::find_in_chain(&inner.buckets[idx], old) else {
                return Err(StoreError::KeyNotFound);
            };
            let new_idx = bucket_index(new);
            if Self::find_in_chain(&inner.buckets[new_idx], new).is_some() {
                return Err(StoreError::KeyAlreadyExists);
            }
            let entry = inner.buckets[idx].remove(pos).1;
            inner.buckets[new_idx].push((new.to_string(), entry.clone()));
            entry
        };

        if let Some(expire_at) = entry.expire_at {
            TtlManager::handle().disarm(self.id, old);
            TtlManager::handle().arm(self.id, new.to_string(), expire_at.saturating_sub(now_secs()));
        }
        Ok(())
    }

    fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        Self::evict_if_expired(&mut inner, key);
        let idx = bucket_index(key);
        let pos = Self::find_in_chain(&inner.buckets[idx], key).ok_or(StoreError::KeyNotFound)?;
        match inner.buckets[idx][pos].1.expire_at {
            Some(expire_at) => Ok(expire_at.saturating_sub(now_secs()) as i64),
            None => Err(StoreError::HasNoTtl),
        }
    }

    fn keys(&self) -> Vec<Key> {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .flat_map(|chain| chain.iter().map(|(k, _)| k.clone()))
            .collect()
    }

    fn find(&self, value: &Value, ttl: i64, mask: ParamMask) -> Vec<Key> {
        let now = now_secs();
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .flat_map(|chain| chain.iter())
            .filter(|(_, entry)| entry_matches(entry, value, ttl, mask, now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn showall(&self) -> Vec<(Key, Value)> {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .flat_map(|chain| chain.iter().map(|(k, e)| (k.clone(), e.value.clone())))
            .collect()
    }

    fn import(&self, path: &Path) -> StoreResult<usize> {
        let records = kv_codec::load(path)?;
        let mut inserted = 0;
        for (key, value) in records {
            if self.set(key, value, 0).is_ok() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn export(&self, path: &Path) -> StoreResult<usize> {
        let records: Vec<(Key, Value)> = self.showall();
        kv_codec::save(path, &records)
    }

    fn size(&self) -> usize {
        self.inner.lock().size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del_round_trip() {
        let engine = HashEngine::new();
        engine
            .set("k1".into(), Value::new("Smith", "John", 1990, "NYC", 100), 0)
            .unwrap();
        assert_eq!(
            engine.get("k1"),
            Some(Value::new("Smith", "John", 1990, "NYC", 100))
        );
        assert!(engine.exists("k1"));
        engine.del("k1").unwrap();
        assert!(!engine.exists("k1"));
        assert_eq!(engine.del("k1").unwrap_err(), StoreError::KeyNotFound);
    }

    #[test]
    fn set_rejects_duplicate_key() {
        let engine = HashEngine::new();
        engine
            .set("a".into(), Value::new("X", "Y", 2000, "Z", 1), 0)
            .unwrap();
        let err = engine
            .set("a".into(), Value::new("X", "Y", 2000, "Z", 1), 0)
            .unwrap_err();
        assert_eq!(err, StoreError::KeyAlreadyExists);
    }

    #[test]
    fn ttl_expires_key() {
        let engine = HashEngine::new();
        engine
            .set("user2".into(), Value::new("Doe", "Jane", 1985, "LA", 50), 1)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_secs(3));
        assert!(!engine.exists("user2"));
        assert_eq!(engine.ttl("user2").unwrap_err(), StoreError::KeyNotFound);
    }

    #[test]
    fn ttl_sentinel_for_no_deadline() {
        let engine = HashEngine::new();
        engine
            .set("user1".into(), Value::new("Smith", "John", 1990, "NYC", 100), 0)
            .unwrap();
        assert_eq!(engine.ttl("user1").unwrap_err(), StoreError::HasNoTtl);
    }

    #[test]
    fn find_matches_selected_fields_only() {
        let engine = HashEngine::new();
        engine.set("k1".into(), Value::new("A", "B", 1, "C", 1), 0).unwrap();
        engine.set("k2".into(), Value::new("A", "B", 2, "C", 1), 0).unwrap();
        engine.set("k3".into(), Value::new("A", "B", 2, "C", 1), 0).unwrap();

        let probe = Value::new("", "", 2, "", 0);
        let mut found = engine.find(&probe, 0, ParamMask::BIRTH_YEAR);
        found.sort();
        assert_eq!(found, vec!["k2".to_string(), "k3".to_string()]);
    }

    #[test]
    fn rename_preserves_absolute_deadline() {
        let engine = HashEngine::new();
        engine
            .set("old".into(), Value::new("A", "B", 1, "C", 1), 100)
            .unwrap();
        engine.rename("old", "new").unwrap();
        assert!(!engine.exists("old"));
        let remaining = engine.ttl("new").unwrap();
        assert!((98..=100).contains(&remaining), "remaining was {remaining}");
    }

    #[test]
    fn update_only_touches_masked_fields() {
        let engine = HashEngine::new();
        engine
            .set("k".into(), Value::new("A", "B", 1, "C", 1), 0)
            .unwrap();
        let probe = Value::new("", "", 0, "", 0);
        engine
            .update("k", &probe, 5, ParamMask::COINS | ParamMask::TTL)
            .unwrap();
        let got = engine.get("k").unwrap();
        assert_eq!(got.lastname, "A");
        assert_eq!(got.name, "B");
        assert_eq!(got.birth_year, 1);
        assert_eq!(got.city, "C");
        assert_eq!(got.coins, 0);
        let remaining = engine.ttl("k").unwrap();
        assert!((1..=5).contains(&remaining));
    }

    #[test]
    fn bucket_index_clamps_to_array_width() {
        assert!(bucket_index("") < BUCKET_COUNT);
        let key: String = std::iter::repeat('\u{ff}').take(300).collect();
        assert!(bucket_index(&key) < BUCKET_COUNT);
    }
}
