//! Worker pool with scheduling-key-ordered dispatch.
//!
//! One thread per configured core. Each worker drains its own queue, a
//! `BTreeMap` keyed by scheduling key, always taking the lowest key
//! first; within one key, pieces run in arrival order. A piece may spin
//! inside the wait/notify protocol while it runs; progress then depends
//! on another core producing the awaited version, which the serial-id
//! assignment guarantees was scheduled.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use ocelot_mvcc::{ChainCx, SlotArray, ValueArena};
use ocelot_types::{CoreId, MAX_CORES};

use crate::completion::Completion;
use crate::piece::Piece;

/// What a running piece sees of its worker.
pub struct WorkerCx<'a> {
    pub core: CoreId,
    pub spinners: &'a SlotArray,
    pub values: &'a ValueArena,
}

impl WorkerCx<'_> {
    /// Context for chain calls made by this piece.
    #[must_use]
    pub fn chain_cx(&self) -> ChainCx<'_> {
        ChainCx {
            core: self.core,
            spinners: self.spinners,
            values: self.values,
        }
    }
}

struct WorkItem {
    piece: Piece,
    completion: Option<Arc<Completion>>,
}

struct WorkerShared {
    queue: Mutex<BTreeMap<u64, VecDeque<WorkItem>>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Fixed pool of per-core worker threads.
pub struct WorkerPool {
    shared: Vec<Arc<WorkerShared>>,
    handles: Vec<JoinHandle<()>>,
    spinners: Arc<SlotArray>,
    values: Arc<ValueArena>,
    next_core: AtomicUsize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(nr_cores: usize, spinners: Arc<SlotArray>, values: Arc<ValueArena>) -> Self {
        assert!(nr_cores >= 1 && nr_cores <= MAX_CORES, "core count out of range");
        let shared: Vec<Arc<WorkerShared>> = (0..nr_cores)
            .map(|_| {
                Arc::new(WorkerShared {
                    queue: Mutex::new(BTreeMap::new()),
                    available: Condvar::new(),
                    shutdown: AtomicBool::new(false),
                })
            })
            .collect();
        let handles = shared
            .iter()
            .enumerate()
            .map(|(i, worker)| {
                // Core count is bounded by MAX_CORES above.
                let core = CoreId::new(i).unwrap_or_else(|| unreachable!());
                let worker = Arc::clone(worker);
                let spinners = Arc::clone(&spinners);
                let values = Arc::clone(&values);
                std::thread::spawn(move || worker_loop(core, &worker, &spinners, &values))
            })
            .collect();
        Self {
            shared,
            handles,
            spinners,
            values,
            next_core: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn nr_cores(&self) -> usize {
        self.shared.len()
    }

    #[must_use]
    pub fn spinners(&self) -> &Arc<SlotArray> {
        &self.spinners
    }

    #[must_use]
    pub fn values(&self) -> &Arc<ValueArena> {
        &self.values
    }

    /// Queue `piece` on a specific core.
    pub fn dispatch_to(&self, core: CoreId, piece: Piece, completion: Option<Arc<Completion>>) {
        let worker = &self.shared[core.get()];
        {
            let mut queue = worker.queue.lock();
            queue
                .entry(piece.sched_key())
                .or_default()
                .push_back(WorkItem { piece, completion });
        }
        worker.available.notify_one();
    }

    /// Queue `piece` on the next core round-robin.
    pub fn dispatch(&self, piece: Piece, completion: Option<Arc<Completion>>) {
        let idx = self.next_core.fetch_add(1, Ordering::Relaxed) % self.shared.len();
        // Pool size is bounded by MAX_CORES.
        if let Some(core) = CoreId::new(idx) {
            self.dispatch_to(core, piece, completion);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.shared {
            worker.shutdown.store(true, Ordering::Release);
            worker.available.notify_all();
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                debug!("worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(core: CoreId, shared: &WorkerShared, spinners: &SlotArray, values: &ValueArena) {
    let cx = WorkerCx {
        core,
        spinners,
        values,
    };
    loop {
        let item = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some((key, mut bucket)) = queue.pop_first() {
                    let item = bucket.pop_front();
                    if !bucket.is_empty() {
                        queue.insert(key, bucket);
                    }
                    if let Some(item) = item {
                        break item;
                    }
                    continue;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        item.piece.execute(&cx);
        if let Some(completion) = item.completion {
            completion.complete(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
