//! Request queue and sequencer.
//!
//! Every upstream call goes through a single FIFO queue. One drain task runs
//! at a time: it executes an entry to completion, pauses for the rate-limit
//! delay when more entries are waiting, and moves on. Entries never overlap.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{DispatchError, Result};
use crate::events::{DispatchEvent, EventBus};

/// Deferred work plus the channel its result is delivered on.
struct QueueEntry<T> {
    work: BoxFuture<'static, Result<T>>,
    respond: oneshot::Sender<Result<T>>,
}

struct QueueState<T> {
    entries: VecDeque<QueueEntry<T>>,
    /// Set while a drain task is alive. Guarded by the same lock as
    /// `entries` so "append" and "start a drain" cannot race.
    processing: bool,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    delay: Duration,
    events: EventBus,
}

/// Serializing FIFO queue with a fixed delay between entries.
///
/// Cloning yields another handle to the same queue.
pub struct RequestQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> std::fmt::Debug for RequestQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.len())
            .field("processing", &self.is_processing())
            .field("delay", &self.inner.delay)
            .finish()
    }
}

impl<T> RequestQueue<T> {
    /// Number of entries waiting to run. The running entry is not counted.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a drain task is active.
    pub fn is_processing(&self) -> bool {
        self.inner.lock().processing
    }
}

impl<T: Send + 'static> RequestQueue<T> {
    /// Creates an empty queue that waits `delay` between entries.
    #[must_use]
    pub fn new(delay: Duration, events: EventBus) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState { entries: VecDeque::new(), processing: false }),
                delay,
                events,
            }),
        }
    }

    /// Appends `work` and returns a ticket that resolves with its result.
    ///
    /// Starts a drain task on the current Tokio runtime if none is running.
    /// Dropping the ticket does not cancel the work.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while the queue is idle.
    pub fn enqueue<F>(&self, work: F) -> QueueTicket<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (respond, rx) = oneshot::channel();

        let (depth, start_drain) = {
            let mut state = self.inner.lock();
            state.entries.push_back(QueueEntry { work: work.boxed(), respond });
            let start_drain = !state.processing;
            state.processing = true;
            (state.entries.len(), start_drain)
        };

        debug!(depth, start_drain, "Request enqueued");
        self.inner.events.emit(DispatchEvent::QueueDepthChanged { depth, processing: true });

        if start_drain {
            tokio::spawn(Arc::clone(&self.inner).drain());
        }

        QueueTicket { rx }
    }
}

impl<T> QueueInner<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + 'static> QueueInner<T> {
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.lock();
                let entry = state.entries.pop_front();
                if entry.is_none() {
                    state.processing = false;
                }
                entry.map(|entry| (entry, state.entries.len()))
            };

            let Some((QueueEntry { work, respond }, remaining)) = next else {
                debug!("Request queue drained");
                self.events.emit(DispatchEvent::QueueDepthChanged { depth: 0, processing: false });
                return;
            };

            self.events.emit(DispatchEvent::QueueDepthChanged { depth: remaining, processing: true });

            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(panic = %message, "Queued request panicked");
                    Err(DispatchError::WorkPanicked(message))
                }
            };

            if let Err(err) = &outcome {
                warn!(error = %err, "Queued request failed");
            }
            if respond.send(outcome).is_err() {
                debug!("Ticket dropped before its request completed");
            }

            let more_waiting = !self.lock().entries.is_empty();
            if more_waiting {
                tokio::time::sleep(self.delay).await;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Handle to the result of one queued entry.
#[derive(Debug)]
pub struct QueueTicket<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for QueueTicket<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(DispatchError::QueueClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn queue<T: Send + 'static>(delay_ms: u64) -> RequestQueue<T> {
        RequestQueue::new(Duration::from_millis(delay_ms), EventBus::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_start_order() {
        let queue = queue::<usize>(1000);
        let started = Arc::new(Mutex::new(Vec::new()));

        let tickets: Vec<_> = (0..5)
            .map(|i| {
                let started = Arc::clone(&started);
                queue.enqueue(async move {
                    started.lock().unwrap().push(i);
                    Ok(i)
                })
            })
            .collect();

        for (i, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(ticket.await.unwrap(), i);
        }
        assert_eq!(*started.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_more_than_one_in_flight() {
        let queue = queue::<()>(10);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tickets: Vec<_> = (0..6)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                queue.enqueue(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        assert!(queue.is_processing());
        for ticket in tickets {
            ticket.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_entries() {
        let queue = queue::<Instant>(1000);

        let first = queue.enqueue(async { Ok(Instant::now()) });
        let second = queue.enqueue(async { Ok(Instant::now()) });

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert!(second.duration_since(first) >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_last_entry() {
        let queue = queue::<()>(1000);
        let start = Instant::now();

        queue.enqueue(async { Ok(()) }).await.unwrap();
        tokio::task::yield_now().await;

        assert!(!queue.is_processing());
        assert!(queue.is_empty());
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_queue() {
        let queue = queue::<u32>(100);

        let failing = queue.enqueue(async { Err(DispatchError::UnknownModel("nope".to_string())) });
        let next = queue.enqueue(async { Ok(7) });

        assert!(matches!(failing.await, Err(DispatchError::UnknownModel(_))));
        assert_eq!(next.await.unwrap(), 7);
    }

    fn explode() -> Result<u32> {
        panic!("work exploded")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_isolated() {
        let queue = queue::<u32>(100);

        let panicking = queue.enqueue(async { explode() });
        let next = queue.enqueue(async { Ok(1) });

        match panicking.await {
            Err(DispatchError::WorkPanicked(message)) => assert_eq!(message, "work exploded"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(next.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_ticket_still_runs() {
        let queue = queue::<()>(100);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        drop(queue.enqueue(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        queue.enqueue(async { Ok(()) }).await.unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_idle() {
        let queue = queue::<u8>(100);
        assert_eq!(queue.enqueue(async { Ok(1) }).await.unwrap(), 1);
        tokio::task::yield_now().await;
        assert_eq!(queue.enqueue(async { Ok(2) }).await.unwrap(), 2);
    }
}
