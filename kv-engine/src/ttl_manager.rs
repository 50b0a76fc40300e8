//! # Process-Wide TTL Manager
//!
//! Grounded in `ttl_manager.{h,cpp}`: a single background worker wakes once
//! a second, holds the manager's mutex, and sweeps every registered
//! dispatcher in turn. The original's function-local `static` plus a leaked
//! worker thread is replaced by a lazily-initialized [`OnceLock`] singleton
//! whose worker the first engine starts and the last engine stops — see
//! [`TtlManager::handle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::dispatcher::Dispatcher;
use crate::engine::{EngineId, StorageEngine};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Worker {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Process-wide singleton holding one [`Dispatcher`] per registered engine.
pub struct TtlManager {
    dispatchers: Mutex<HashMap<EngineId, Arc<Dispatcher>>>,
    worker: Mutex<Option<Worker>>,
}

static INSTANCE: OnceLock<TtlManager> = OnceLock::new();

impl TtlManager {
    /// Returns the process-wide instance, creating it on first call.
    pub fn handle() -> &'static TtlManager {
        INSTANCE.get_or_init(|| TtlManager {
            dispatchers: Mutex::new(HashMap::new()),
            worker: Mutex::new(None),
        })
    }

    /// Registers a newly constructed engine and ensures the worker is
    /// running. Called once, from the engine's constructor.
    pub fn register(&self, id: EngineId, engine: Weak<dyn StorageEngine>) {
        self.dispatchers
            .lock()
            .insert(id, Arc::new(Dispatcher::new(engine)));
        self.ensure_worker();
        tracing::debug!(engine_id = id, "registered engine with ttl manager");
    }

    /// Deregisters an engine on drop. Stops the worker once no engine
    /// remains registered.
    pub fn unregister(&self, id: EngineId) {
        let mut dispatchers = self.dispatchers.lock();
        dispatchers.remove(&id);
        let empty = dispatchers.is_empty();
        drop(dispatchers);
        tracing::debug!(engine_id = id, "unregistered engine from ttl manager");
        if empty {
            self.stop_worker();
        }
    }

    /// Arms `key` on the dispatcher belonging to engine `id`.
    pub fn arm(&self, id: EngineId, key: kv_common::Key, ttl_seconds: u64) {
        if let Some(dispatcher) = self.dispatchers.lock().get(&id).cloned() {
            dispatcher.arm(key, ttl_seconds);
        }
    }

    /// Disarms `key` on the dispatcher belonging to engine `id`.
    pub fn disarm(&self, id: EngineId, key: &str) {
        if let Some(dispatcher) = self.dispatchers.lock().get(&id).cloned() {
            dispatcher.disarm(key);
        }
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name("ttl-manager".to_string())
            .spawn(move || Self::run_worker(stop_for_thread))
            .expect("failed to spawn ttl manager worker thread");
        *worker = Some(Worker { stop, join });
    }

    fn stop_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::SeqCst);
            let _ = worker.join.join();
        }
    }

    fn run_worker(stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::SeqCst) {
            let tick_start = Instant::now();

            let dispatchers: Vec<Arc<Dispatcher>> =
                TtlManager::handle().dispatchers.lock().values().cloned().collect();
            for dispatcher in &dispatchers {
                dispatcher.sweep();
            }
            tracing::trace!(dispatchers = dispatchers.len(), "ttl manager tick");

            let elapsed = tick_start.elapsed();
            if elapsed < SWEEP_INTERVAL {
                std::thread::sleep(SWEEP_INTERVAL - elapsed);
            }
        }
    }
}
