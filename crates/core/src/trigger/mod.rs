//! Asynchronous trigger side effects.
//!
//! Sounds flagged as triggers ask for a side effect (a visual refresh in the
//! application) when they play. The tick thread must never wait on it, so
//! triggers are handed to a small fixed pool of workers through a bounded
//! queue. A full queue drops the trigger instead of blocking.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

use crate::{Result, TriggerConfig};

/// Side effect run for every trigger sound. Implementations may be invoked
/// concurrently from several workers.
pub trait TriggerSink: Send + Sync + 'static {
    fn trigger(&self) -> Result<()>;
}

impl<F> TriggerSink for F
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    fn trigger(&self) -> Result<()> {
        self()
    }
}

/// Counts triggers. Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct TriggerCounter {
    count: Arc<AtomicUsize>,
}

impl TriggerCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl TriggerSink for TriggerCounter {
    fn trigger(&self) -> Result<()> {
        let pulse = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(pulse, "trigger");
        Ok(())
    }
}

/// Fixed set of worker threads fed by a bounded queue.
pub struct TriggerPool {
    sender: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl TriggerPool {
    pub fn new(sink: Arc<dyn TriggerSink>, config: &TriggerConfig) -> Result<Self> {
        config.validate()?;
        let (sender, receiver) = crossbeam_channel::bounded::<()>(config.queue_depth);
        let failed = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let receiver = receiver.clone();
            let sink = Arc::clone(&sink);
            let failed = Arc::clone(&failed);
            let worker = thread::Builder::new()
                .name(format!("groove-trigger-{index}"))
                .spawn(move || {
                    for () in receiver.iter() {
                        run_isolated(sink.as_ref(), &failed);
                    }
                })?;
            workers.push(worker);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            dropped: Arc::new(AtomicU64::new(0)),
            failed,
        })
    }

    /// Queues one side effect without blocking. Returns false when the
    /// trigger was dropped.
    pub fn fire(&self) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("trigger queue full, dropping trigger");
                false
            }
            Err(TrySendError::Disconnected(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Triggers dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Side effects that returned an error or panicked.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Closes the queue, lets the workers drain it and joins them.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("trigger worker panicked");
            }
        }
    }
}

impl Drop for TriggerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TriggerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerPool")
            .field("workers", &self.workers.len())
            .field("dropped", &self.dropped())
            .field("failed", &self.failed())
            .finish()
    }
}

fn run_isolated(sink: &dyn TriggerSink, failed: &AtomicU64) {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.trigger())) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            failed.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, "trigger side effect failed");
        }
        Err(_) => {
            failed.fetch_add(1, Ordering::Relaxed);
            warn!("trigger side effect panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use super::*;
    use crate::GrooveError;

    fn config(workers: usize, queue_depth: usize) -> TriggerConfig {
        TriggerConfig {
            workers,
            queue_depth,
        }
    }

    #[test]
    fn runs_every_queued_trigger() {
        let counter = TriggerCounter::new();
        let mut pool = TriggerPool::new(Arc::new(counter.clone()), &config(3, 64)).unwrap();

        for _ in 0..40 {
            assert!(pool.fire());
        }
        pool.shutdown();

        assert_eq!(counter.count(), 40);
        assert_eq!(pool.dropped(), 0);
    }

    #[test]
    fn failures_and_panics_stay_inside_the_pool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let sink = move || -> Result<()> {
            let call = seen.fetch_add(1, Ordering::SeqCst);
            match call % 3 {
                0 => Err(GrooveError::Trigger("refresh failed".into())),
                1 => panic!("refresh exploded"),
                _ => Ok(()),
            }
        };

        let mut pool = TriggerPool::new(Arc::new(sink), &config(1, 16)).unwrap();
        for _ in 0..6 {
            pool.fire();
        }
        pool.shutdown();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(pool.failed(), 4);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let worker_gate = Arc::clone(&gate);
        let sink = move || -> Result<()> {
            let _guard = worker_gate.lock().map_err(|_| GrooveError::msg("poisoned"))?;
            Ok(())
        };

        let mut pool = TriggerPool::new(Arc::new(sink), &config(1, 1)).unwrap();
        // One trigger is taken by the blocked worker, one fills the queue.
        pool.fire();
        std::thread::sleep(Duration::from_millis(100));
        pool.fire();
        let accepted = (0..10).filter(|_| pool.fire()).count();

        assert_eq!(accepted, 0);
        assert_eq!(pool.dropped(), 10);

        drop(held);
        pool.shutdown();
    }

    #[test]
    fn rejects_empty_pool() {
        let counter = TriggerCounter::new();
        assert!(TriggerPool::new(Arc::new(counter), &config(0, 4)).is_err());
    }
}
