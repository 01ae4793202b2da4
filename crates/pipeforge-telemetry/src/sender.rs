//! Bounded event queue and the background sender thread.
//!
//! Enqueue is non-blocking: when the queue is full the batch is dropped.
//! Telemetry loss is acceptable; adding latency to a tool call is not. One
//! lazily-started worker thread pulls batches and POSTs them to the
//! collector, swallowing every transport error. A typed `Stop` sentinel,
//! distinct from a data batch, ends the worker loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::SOURCE_CONTEXT;
use crate::event::Event;
use crate::session::lock_or_recover;

const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const JOIN_POLL: Duration = Duration::from_millis(10);

pub(crate) enum QueueItem {
    Batch(Vec<Event>),
    Stop,
}

/// Fixed-capacity FIFO of pending batches.
pub(crate) struct EventQueue {
    items: Mutex<VecDeque<QueueItem>>,
    available: Condvar,
    capacity: usize,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        EventQueue {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a batch without blocking. Returns false when the batch was
    /// dropped because the queue is at capacity.
    pub(crate) fn push_batch(&self, events: Vec<Event>) -> bool {
        let mut items = lock_or_recover(&self.items);
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(QueueItem::Batch(events));
        self.available.notify_one();
        true
    }

    /// Enqueue the stop sentinel. Always accepted, even at capacity, so a
    /// full queue cannot wedge shutdown.
    pub(crate) fn push_stop(&self) {
        let mut items = lock_or_recover(&self.items);
        items.push_back(QueueItem::Stop);
        self.available.notify_one();
    }

    /// Pop one item, waiting up to `timeout` for something to arrive.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + timeout;
        let mut items = lock_or_recover(&self.items);
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _result) = self
                .available
                .wait_timeout(items, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            items = guard;
        }
    }

    /// Remove and flatten every pending batch. Used by the shutdown drain.
    pub(crate) fn drain_events(&self) -> Vec<Event> {
        let mut items = lock_or_recover(&self.items);
        let mut events = Vec::new();
        while let Some(item) = items.pop_front() {
            if let QueueItem::Batch(batch) = item {
                events.extend(batch);
            }
        }
        events
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock_or_recover(&self.items).len()
    }
}

/// Owns the queue and the worker thread lifecycle.
pub(crate) struct Sender {
    queue: Arc<EventQueue>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    endpoint: String,
    request_timeout: Duration,
}

impl Sender {
    pub(crate) fn new(endpoint: String, request_timeout: Duration, queue_capacity: usize) -> Self {
        Sender {
            queue: Arc::new(EventQueue::new(queue_capacity)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            endpoint,
            request_timeout,
        }
    }

    /// Enqueue a batch for async delivery, starting the worker if needed.
    pub(crate) fn enqueue(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        self.ensure_worker_started();
        self.queue.push_batch(events);
    }

    /// Start the worker thread exactly once. The lock makes a concurrent
    /// first enqueue from two tool calls race-safe.
    fn ensure_worker_started(&self) {
        let mut worker = lock_or_recover(&self.worker);
        let alive = worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        if alive {
            return;
        }

        self.stop.store(false, Ordering::SeqCst);
        let queue = Arc::clone(&self.queue);
        let stop = Arc::clone(&self.stop);
        let endpoint = self.endpoint.clone();
        let request_timeout = self.request_timeout;

        let handle = std::thread::Builder::new()
            .name("pipeforge-mcp-analytics".into())
            .spawn(move || sender_worker(queue, stop, endpoint, request_timeout));

        match handle {
            Ok(handle) => *worker = Some(handle),
            Err(_) => {
                // Thread spawn failure means no telemetry, nothing more.
            }
        }
    }

    /// Signal the worker to stop and wait for it within `budget`.
    /// Returns true when the worker is confirmed stopped.
    pub(crate) fn stop_and_join(&self, budget: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.push_stop();

        let mut worker = lock_or_recover(&self.worker);
        let Some(handle) = worker.take() else {
            return true;
        };

        let deadline = Instant::now() + budget;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                // Leave the thread detached; it will exit on its own.
                *worker = Some(handle);
                return false;
            }
            std::thread::sleep(JOIN_POLL);
        }
        let _ = handle.join();
        true
    }

    /// Remaining queued events, for the shutdown drain.
    pub(crate) fn drain(&self) -> Vec<Event> {
        self.queue.drain_events()
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &EventQueue {
        &self.queue
    }
}

fn sender_worker(
    queue: Arc<EventQueue>,
    stop: Arc<AtomicBool>,
    endpoint: String,
    request_timeout: Duration,
) {
    // The worker owns its HTTP client: created on the first batch, dropped
    // only when this loop exits, so shutdown can never close it mid-request.
    let mut client: Option<reqwest::blocking::Client> = None;

    while !stop.load(Ordering::SeqCst) {
        match queue.pop_timeout(POLL_TIMEOUT) {
            Some(QueueItem::Batch(batch)) => {
                if client.is_none() {
                    client = build_client(request_timeout);
                }
                if let Some(client) = &client {
                    post_batch(client, &endpoint, &batch);
                }
            }
            Some(QueueItem::Stop) => break,
            None => {}
        }
    }
}

fn build_client(timeout: Duration) -> Option<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .ok()
}

/// POST one batch to the collector. Any response counts as success; any
/// error is swallowed.
pub(crate) fn post_batch(client: &reqwest::blocking::Client, endpoint: &str, events: &[Event]) {
    let _ = client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .header("Source-Context", SOURCE_CONTEXT)
        .json(events)
        .send();
}

/// One-shot synchronous send, used by the shutdown path to bypass the queue.
pub(crate) fn send_sync(endpoint: &str, request_timeout: Duration, events: &[Event]) {
    if events.is_empty() {
        return;
    }
    if let Some(client) = build_client(request_timeout) {
        post_batch(&client, endpoint, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn event(name: &str) -> Event {
        Event::Track {
            user_id: "00000000-0000-0000-0000-000000000000".into(),
            event: name.into(),
            properties: Map::new(),
            debug: false,
        }
    }

    #[test]
    fn push_past_capacity_drops_instead_of_blocking() {
        let queue = EventQueue::new(3);
        for i in 0..3 {
            assert!(queue.push_batch(vec![event(&format!("e{}", i))]));
        }
        // Capacity reached: further pushes are rejected immediately.
        assert!(!queue.push_batch(vec![event("overflow")]));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn stop_sentinel_is_accepted_at_capacity() {
        let queue = EventQueue::new(1);
        assert!(queue.push_batch(vec![event("only")]));
        assert!(!queue.push_batch(vec![event("dropped")]));
        queue.push_stop();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn pop_timeout_returns_none_on_empty_queue() {
        let queue = EventQueue::new(4);
        let started = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn drain_flattens_batches_and_skips_sentinels() {
        let queue = EventQueue::new(4);
        queue.push_batch(vec![event("a"), event("b")]);
        queue.push_stop();
        queue.push_batch(vec![event("c")]);

        let drained = queue.drain_events();
        assert_eq!(drained.len(), 3);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn worker_consumes_stop_sentinel_and_exits() {
        // Port 9 (discard) refuses immediately; the failed POST is
        // swallowed and the worker exits on the sentinel.
        let sender = Sender::new(
            "http://127.0.0.1:9".into(),
            Duration::from_millis(100),
            4,
        );
        sender.enqueue(vec![event("warmup")]);
        assert!(sender.stop_and_join(Duration::from_secs(2)));
    }

    #[test]
    fn stop_and_join_without_worker_is_a_noop() {
        let sender = Sender::new(
            "http://127.0.0.1:9".into(),
            Duration::from_millis(100),
            4,
        );
        assert!(sender.stop_and_join(Duration::from_millis(50)));
        assert_eq!(sender.queue().len(), 1); // just the sentinel
    }
}
