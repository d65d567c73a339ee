//! Bounded worker pool for the asynchronous command wrappers.
//!
//! Backed by `rayon::ThreadPool` with bounded-queue submission semantics
//! provided by a `crossbeam_channel::bounded` semaphore channel: submitters
//! acquire a slot before posting, workers release it on completion. The
//! overflow policy is configurable: block the producer until a slot frees,
//! or fail the submission fast.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::error::AsyncError;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    // Submitted-but-not-yet-finished jobs.
    pending: usize,
}

/// Fixed-size worker pool with a bounded submission queue.
pub struct WorkPool {
    pool: Arc<rayon::ThreadPool>,
    /// Semaphore channel: a token in the channel is a free slot. Capacity
    /// is queue_size + nb_threads so a full queue still leaves every worker
    /// busy rather than idle.
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
    state: Arc<(Mutex<PoolState>, Condvar)>,
    fail_fast: bool,
}

impl WorkPool {
    /// Returns `None` for a zero thread count, a zero queue size, or a
    /// worker-thread spawn failure.
    pub fn new(nb_threads: usize, queue_size: usize, fail_fast: bool) -> Option<Self> {
        if nb_threads < 1 || queue_size < 1 {
            return None;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nb_threads)
            .thread_name(|i| format!("dictcache-worker-{i}"))
            .build()
            .ok()?;

        let capacity = queue_size + nb_threads;
        let (slot_tx, slot_rx) = bounded(capacity);
        for _ in 0..capacity {
            slot_tx.send(()).ok()?;
        }

        Some(WorkPool {
            pool: Arc::new(pool),
            slot_tx,
            slot_rx,
            state: Arc::new((Mutex::new(PoolState { pending: 0 }), Condvar::new())),
            fail_fast,
        })
    }

    /// Submits a job, honoring the configured overflow policy. In
    /// fail-fast mode a full queue returns `AsyncError::Rejected`; in
    /// blocking mode the call waits for a slot.
    pub fn submit(&self, job: Job) -> Result<(), AsyncError> {
        if self.fail_fast {
            match self.slot_rx.try_recv() {
                Ok(()) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return Err(AsyncError::Rejected)
                }
            }
        } else {
            self.slot_rx.recv().map_err(|_| AsyncError::Rejected)?;
        }

        // Count before spawning so a barrier cannot observe zero between
        // submission and execution start.
        {
            let (lock, _cvar) = &*self.state;
            let mut s = lock.lock().expect("pool state poisoned");
            s.pending += 1;
        }

        let state = Arc::clone(&self.state);
        let slot_tx = self.slot_tx.clone();
        self.pool.spawn(move || {
            job();
            let (lock, cvar) = &*state;
            let mut s = lock.lock().expect("pool state poisoned");
            s.pending -= 1;
            if s.pending == 0 {
                cvar.notify_all();
            }
            drop(s);
            let _ = slot_tx.send(());
        });
        Ok(())
    }

    /// Blocks until every submitted job has finished. The pool stays usable
    /// afterwards.
    pub fn drain(&self) {
        let (lock, cvar) = &*self.state;
        let mut s = lock.lock().expect("pool state poisoned");
        while s.pending > 0 {
            s = cvar.wait(s).expect("pool state poisoned");
        }
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        // rayon joins its workers on drop; just make sure none are mid-job.
        self.drain();
    }
}

// ---------------------------------------------------------------------------
// Async command replies
// ---------------------------------------------------------------------------

/// Pending result of an asynchronous command.
///
/// `wait` applies the optional per-request timeout; on expiry the caller
/// gets a synthetic failure and the worker's late result is dropped with
/// this receiver.
pub struct AsyncReply<T> {
    rx: Receiver<T>,
    timeout: Option<Duration>,
}

impl<T> AsyncReply<T> {
    pub(crate) fn new(rx: Receiver<T>, timeout: Option<Duration>) -> Self {
        AsyncReply { rx, timeout }
    }

    /// Waits for the worker's result.
    pub fn wait(self) -> Result<T, AsyncError> {
        match self.timeout {
            Some(t) => self.rx.recv_timeout(t).map_err(|e| match e {
                crossbeam_channel::RecvTimeoutError::Timeout => AsyncError::Timeout,
                crossbeam_channel::RecvTimeoutError::Disconnected => AsyncError::Rejected,
            }),
            None => self.rx.recv().map_err(|_| AsyncError::Rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn invalid_parameters_return_none() {
        assert!(WorkPool::new(0, 1, false).is_none());
        assert!(WorkPool::new(1, 0, false).is_none());
    }

    #[test]
    fn submitted_jobs_all_run() {
        let pool = WorkPool::new(2, 4, false).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let c = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn fail_fast_rejects_on_overflow() {
        let pool = WorkPool::new(1, 1, true).unwrap();
        let gate = Arc::new(Barrier::new(2));

        // Occupy the single worker until the barrier opens.
        let g = Arc::clone(&gate);
        pool.submit(Box::new(move || {
            g.wait();
        }))
        .unwrap();

        // Fill the remaining slot, then expect rejection.
        let mut rejected = false;
        for _ in 0..4 {
            if pool.submit(Box::new(|| {})).is_err() {
                rejected = true;
                break;
            }
        }
        assert!(rejected, "bounded queue must reject in fail-fast mode");
        gate.wait();
        pool.drain();
    }

    #[test]
    fn drain_is_reusable() {
        let pool = WorkPool::new(2, 2, false).unwrap();
        pool.drain();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.drain();
    }

    #[test]
    fn reply_times_out_and_discards_late_result() {
        let pool = WorkPool::new(1, 2, false).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(Box::new(move || {
            std::thread::sleep(Duration::from_millis(200));
            let _ = tx.send(42u32);
        }))
        .unwrap();

        let reply = AsyncReply::new(rx, Some(Duration::from_millis(10)));
        assert!(matches!(reply.wait(), Err(AsyncError::Timeout)));
        pool.drain();
    }

    #[test]
    fn reply_delivers_result() {
        let pool = WorkPool::new(1, 2, false).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(Box::new(move || {
            let _ = tx.send(7u32);
        }))
        .unwrap();
        let reply = AsyncReply::new(rx, Some(Duration::from_secs(5)));
        assert_eq!(reply.wait().unwrap(), 7);
    }
}
