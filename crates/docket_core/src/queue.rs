//! Batched write queue.
//!
//! A [`WriteQueue`] accumulates events produced by an engine and hands them
//! to the engine's batch processor in bulk. A dedicated worker thread
//! drains the queue once per flush interval; owners can also drain it
//! synchronously with [`WriteQueue::flush`].
//!
//! # Ordering
//!
//! Batches are processed one at a time under an execution lock, so the
//! processor always sees events in enqueue order. The pending buffer is a
//! leaf lock: enqueueing never waits for a flush in progress.
//!
//! # Failures
//!
//! A batch whose processor call fails is dropped. Synchronous flushes
//! return the error; background flushes report it to the handler set with
//! [`WriteQueue::on_error`], or log it when no handler is installed.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Consumes one batch of queued events.
pub type BatchProcessor<E> = Box<dyn Fn(Vec<E>) -> CoreResult<()> + Send + Sync>;

/// Receives errors from background flushes.
pub type FlushErrorHandler = Arc<dyn Fn(&CoreError) + Send + Sync>;

struct QueueInner<E> {
    name: String,
    pending: Mutex<VecDeque<E>>,
    wake: Condvar,
    execute: Mutex<()>,
    processor: BatchProcessor<E>,
    on_error: RwLock<Option<FlushErrorHandler>>,
    interval: Mutex<Duration>,
    max_batch: usize,
    shutdown: AtomicBool,
}

impl<E> QueueInner<E> {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn take(&self, limit: usize) -> Vec<E> {
        let mut pending = self.pending.lock();
        let count = if limit == 0 {
            pending.len()
        } else {
            limit.min(pending.len())
        };
        pending.drain(..count).collect()
    }

    /// Processes at most one batch. Returns the number of events taken.
    fn drain_once(&self) -> CoreResult<usize> {
        let _execute = self.execute.lock();
        let batch = self.take(self.max_batch);
        let count = batch.len();
        if count > 0 {
            (self.processor)(batch)?;
        }
        Ok(count)
    }

    fn drain_all(&self) -> CoreResult<usize> {
        let _execute = self.execute.lock();
        let mut total = 0;
        loop {
            let batch = self.take(0);
            if batch.is_empty() {
                return Ok(total);
            }
            total += batch.len();
            (self.processor)(batch)?;
        }
    }

    fn report(&self, err: &CoreError) {
        let handler = self.on_error.read().clone();
        match handler {
            Some(handler) => handler(err),
            None => error!(queue = %self.name, error = %err, "background flush failed"),
        }
    }

    /// Blocks until there is work and one interval has passed.
    ///
    /// Returns false once the queue is shutting down.
    fn wait_for_tick(&self) -> bool {
        let mut pending = self.pending.lock();
        while pending.is_empty() {
            if self.is_shutdown() {
                return false;
            }
            self.wake.wait(&mut pending);
        }

        let deadline = Instant::now() + *self.interval.lock();
        while !self.is_shutdown() {
            if self.wake.wait_until(&mut pending, deadline).timed_out() {
                return true;
            }
        }
        false
    }

    fn run(&self) {
        debug!(queue = %self.name, "flush worker started");
        while self.wait_for_tick() {
            match self.drain_once() {
                Ok(0) => {}
                Ok(count) => debug!(queue = %self.name, count, "flushed batch"),
                Err(err) => self.report(&err),
            }
        }
        debug!(queue = %self.name, "flush worker stopped");
    }
}

/// Event queue drained in batches by a background worker.
pub struct WriteQueue<E: Send + 'static> {
    inner: Arc<QueueInner<E>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + 'static> WriteQueue<E> {
    /// Starts a queue and its worker thread.
    ///
    /// `max_batch` limits how many events one timer tick hands to the
    /// processor (0 = everything pending).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval, or an I/O error if the
    /// worker thread cannot be spawned.
    pub fn start(
        name: impl Into<String>,
        interval: Duration,
        max_batch: usize,
        processor: BatchProcessor<E>,
    ) -> CoreResult<Self> {
        if interval.is_zero() {
            return Err(CoreError::invalid_config("flush interval must be positive"));
        }

        let name = name.into();
        let inner = Arc::new(QueueInner {
            name: name.clone(),
            pending: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
            execute: Mutex::new(()),
            processor,
            on_error: RwLock::new(None),
            interval: Mutex::new(interval),
            max_batch,
            shutdown: AtomicBool::new(false),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name(format!("docket-flush-{name}"))
            .spawn(move || worker_inner.run())?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues one event.
    pub fn enqueue(&self, event: E) {
        let mut pending = self.inner.pending.lock();
        pending.push_back(event);
        self.inner.wake.notify_one();
    }

    /// Queues several events in order.
    pub fn enqueue_all(&self, events: impl IntoIterator<Item = E>) {
        let mut pending = self.inner.pending.lock();
        let before = pending.len();
        pending.extend(events);
        if pending.len() > before {
            self.inner.wake.notify_one();
        }
    }

    /// Number of events waiting to be flushed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns true if nothing is waiting to be flushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every pending event through the processor, on the calling
    /// thread. Returns the number of events processed.
    ///
    /// # Errors
    ///
    /// Returns the first processor error. The failed batch is dropped;
    /// events queued behind it stay pending.
    pub fn flush(&self) -> CoreResult<usize> {
        self.inner.drain_all()
    }

    /// Drops every pending event without processing it.
    pub fn discard(&self) -> usize {
        let mut pending = self.inner.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    /// Changes the flush interval. Takes effect from the next tick.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval.
    pub fn set_interval(&self, interval: Duration) -> CoreResult<()> {
        if interval.is_zero() {
            return Err(CoreError::invalid_config("flush interval must be positive"));
        }
        *self.inner.interval.lock() = interval;
        Ok(())
    }

    /// Returns the current flush interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        *self.inner.interval.lock()
    }

    /// Installs the handler for background flush errors.
    pub fn on_error(&self, handler: FlushErrorHandler) {
        *self.inner.on_error.write() = Some(handler);
    }

    /// Stops the worker thread. Pending events are left untouched; flush
    /// first to persist them. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _pending = self.inner.pending.lock();
            self.inner.wake.notify_all();
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!(queue = %self.inner.name, "flush worker panicked");
            }
        }
    }
}

impl<E: Send + 'static> Drop for WriteQueue<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<E: Send + 'static> std::fmt::Debug for WriteQueue<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("name", &self.inner.name)
            .field("pending", &self.len())
            .field("interval", &self.interval())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recording_queue(
        interval: Duration,
        max_batch: usize,
    ) -> (WriteQueue<u32>, Arc<Mutex<Vec<Vec<u32>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let queue = WriteQueue::start(
            "test",
            interval,
            max_batch,
            Box::new(move |batch| {
                sink.lock().push(batch);
                Ok(())
            }),
        )
        .unwrap();
        (queue, seen)
    }

    #[test]
    fn flush_drains_in_order() {
        let (queue, seen) = recording_queue(Duration::from_secs(60), 0);
        queue.enqueue(1);
        queue.enqueue_all([2, 3]);
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.flush().unwrap(), 3);
        assert!(queue.is_empty());
        assert_eq!(*seen.lock(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn flush_ignores_batch_limit() {
        let (queue, seen) = recording_queue(Duration::from_secs(60), 2);
        queue.enqueue_all([1, 2, 3]);
        queue.flush().unwrap();

        let flattened: Vec<u32> = seen.lock().iter().flatten().copied().collect();
        assert_eq!(flattened, vec![1, 2, 3]);
    }

    #[test]
    fn worker_flushes_after_interval() {
        let (queue, seen) = recording_queue(Duration::from_millis(20), 0);
        queue.enqueue(7);

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock(), vec![vec![7]]);
        assert!(queue.is_empty());
    }

    #[test]
    fn worker_respects_batch_limit() {
        let (queue, seen) = recording_queue(Duration::from_millis(10), 2);
        queue.enqueue_all([1, 2, 3, 4, 5]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().iter().map(Vec::len).sum::<usize>() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let batches = seen.lock().clone();
        assert!(batches.iter().all(|b| b.len() <= 2));
        let flattened: Vec<u32> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn nothing_flushes_before_tick() {
        let (queue, seen) = recording_queue(Duration::from_secs(60), 0);
        queue.enqueue(1);
        thread::sleep(Duration::from_millis(30));
        assert!(seen.lock().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn flush_error_is_returned_and_batch_dropped() {
        let queue: WriteQueue<u32> = WriteQueue::start(
            "failing",
            Duration::from_secs(60),
            0,
            Box::new(|_| Err(CoreError::invalid_config("boom"))),
        )
        .unwrap();
        queue.enqueue(1);

        assert!(queue.flush().is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn background_errors_reach_handler() {
        let queue: WriteQueue<u32> = WriteQueue::start(
            "failing",
            Duration::from_millis(10),
            0,
            Box::new(|_| Err(CoreError::invalid_config("boom"))),
        )
        .unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        queue.on_error(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        queue.enqueue(1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while failures.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn discard_drops_pending() {
        let (queue, seen) = recording_queue(Duration::from_secs(60), 0);
        queue.enqueue_all([1, 2]);
        assert_eq!(queue.discard(), 2);
        assert_eq!(queue.flush().unwrap(), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn zero_interval_rejected() {
        let result: CoreResult<WriteQueue<u32>> =
            WriteQueue::start("zero", Duration::ZERO, 0, Box::new(|_| Ok(())));
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));

        let (queue, _) = recording_queue(Duration::from_secs(1), 0);
        assert!(queue.set_interval(Duration::ZERO).is_err());
        queue.set_interval(Duration::from_millis(5)).unwrap();
        assert_eq!(queue.interval(), Duration::from_millis(5));
    }

    #[test]
    fn shutdown_stops_worker() {
        let (queue, seen) = recording_queue(Duration::from_millis(10), 0);
        queue.shutdown();
        queue.enqueue(1);
        thread::sleep(Duration::from_millis(40));
        assert!(seen.lock().is_empty());
        assert_eq!(queue.flush().unwrap(), 1);
    }
}
