//! # Storage Contract
//!
//! [`StorageEngine`] is the capability set both [`crate::HashEngine`] and
//! [`crate::RbTreeEngine`] implement. It generalizes the teacher's `KVEngine`
//! trait (`get`/`set`/`delete`/`expire`/`ttl`) to the five-field record this
//! store holds, plus the ordered/predicate operations (`keys`, `find`,
//! `showall`) the red-black tree engine makes meaningful.
//!
//! `Send + Sync` so an `Arc<dyn StorageEngine>` can be shared between the
//! REPL's command loop and the TTL manager's sweep thread without any
//! wrapper beyond the `Arc` itself.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use kv_common::{Key, ParamMask, StoreResult, Value};

/// Identifies one constructed engine instance to the TTL manager's
/// dispatcher map. Not meaningful across process restarts.
pub type EngineId = u64;

pub(crate) fn next_engine_id() -> EngineId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// The value stored under a key, plus its absolute expiry second (if any).
///
/// `expire_at` is in [`crate::clock::now_secs`] units, not wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Value,
    pub expire_at: Option<u64>,
}

/// Operations common to every storage engine variant.
///
/// Implementations serialize every call behind one engine-wide
/// `parking_lot::Mutex`; there is no reader/writer split (see module docs on
/// [`crate::hash`] and [`crate::rbtree`] for why).
pub trait StorageEngine: Send + Sync {
    /// Stable identity used to register/unregister with the TTL manager.
    fn id(&self) -> EngineId;

    /// Inserts `value` under `key`. Fails with `KeyAlreadyExists` if the key
    /// is already present. `ttl <= 0` means no deadline; `ttl > 0` installs
    /// an absolute deadline `now + ttl` and arms the TTL manager.
    fn set(&self, key: Key, value: Value, ttl: i64) -> StoreResult<()>;

    /// Returns the current value, or `None` if absent or already expired.
    fn get(&self, key: &str) -> Option<Value>;

    /// Returns whether `key` currently resolves to a live entry.
    fn exists(&self, key: &str) -> bool;

    /// Removes `key`, disarming its TTL entry if it had one.
    fn del(&self, key: &str) -> StoreResult<()>;

    /// Overwrites only the fields selected by `mask`. If `mask` selects the
    /// TTL bit, `ttl > 0` installs/refreshes a deadline and `ttl <= 0` clears
    /// it.
    fn update(&self, key: &str, value: &Value, ttl: i64, mask: ParamMask) -> StoreResult<()>;

    /// Moves `old`'s entry to `new`, preserving its absolute deadline
    /// verbatim. Fails with `KeyNotFound` if `old` is absent, or
    /// `KeyAlreadyExists` if `new` is already taken (in which case `old` is
    /// left untouched).
    fn rename(&self, old: &str, new: &str) -> StoreResult<()>;

    /// Seconds remaining until expiry. `HasNoTtl` if the key exists without a
    /// deadline; `KeyNotFound` if the key is absent.
    fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// All live keys, in the engine's natural order.
    fn keys(&self) -> Vec<Key>;

    /// Keys whose entry matches `value`/`ttl` on every field `mask` selects.
    /// The TTL bit matches only entries whose absolute deadline equals
    /// exactly `now + ttl` — an equality predicate, not a range one.
    fn find(&self, value: &Value, ttl: i64, mask: ParamMask) -> Vec<Key>;

    /// All `(key, value)` pairs, in the engine's natural order.
    fn showall(&self) -> Vec<(Key, Value)>;

    /// Loads records from `path` and `set`s each; collisions against
    /// existing keys are skipped. Returns the count actually inserted.
    fn import(&self, path: &Path) -> StoreResult<usize>;

    /// Writes every live entry to `path`. Returns the count written.
    fn export(&self, path: &Path) -> StoreResult<usize>;

    /// Number of live entries. Never blocks a concurrent mutator for longer
    /// than the engine's single lock acquisition.
    fn size(&self) -> usize;
}

/// True once `expire_at` has passed. Both engines call this on the read path
/// (`get`, `exists`, `del`, `ttl`, ...) to evict lazily instead of waiting for
/// the next TTL sweep.
pub(crate) fn is_expired(entry: &Entry, now: u64) -> bool {
    matches!(entry.expire_at, Some(expire_at) if expire_at <= now)
}

/// Copies the fields `mask` selects from `source` onto `target`.
pub(crate) fn apply_mask(target: &mut Value, source: &Value, mask: ParamMask) {
    if mask.contains(ParamMask::LASTNAME) {
        target.lastname = source.lastname.clone();
    }
    if mask.contains(ParamMask::NAME) {
        target.name = source.name.clone();
    }
    if mask.contains(ParamMask::BIRTH_YEAR) {
        target.birth_year = source.birth_year;
    }
    if mask.contains(ParamMask::CITY) {
        target.city = source.city.clone();
    }
    if mask.contains(ParamMask::COINS) {
        target.coins = source.coins;
    }
}

/// Whether `entry` matches `value`/`ttl` on every field `mask` selects. The
/// ttl bit matches only an absolute deadline equal to exactly `now + ttl`.
pub(crate) fn entry_matches(entry: &Entry, value: &Value, ttl: i64, mask: ParamMask, now: u64) -> bool {
    if mask.contains(ParamMask::LASTNAME) && entry.value.lastname != value.lastname {
        return false;
    }
    if mask.contains(ParamMask::NAME) && entry.value.name != value.name {
        return false;
    }
    if mask.contains(ParamMask::BIRTH_YEAR) && entry.value.birth_year != value.birth_year {
        return false;
    }
    if mask.contains(ParamMask::CITY) && entry.value.city != value.city {
        return false;
    }
    if mask.contains(ParamMask::COINS) && entry.value.coins != value.coins {
        return false;
    }
    if mask.contains(ParamMask::TTL) {
        let expected = now + ttl.max(0) as u64;
        if entry.expire_at != Some(expected) {
            return false;
        }
    }
    true
}
