//! FIFO admission queue with a per-minute request ceiling.
//!
//! Tasks are admitted in submission order. At most `max_requests_per_minute`
//! tasks are admitted per rolling window; the rest wait until a background
//! ticker drains them once the window rolls over. The queue never retries:
//! a failing task's error goes straight back to its caller.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::QueueError;
use crate::types::PipelineConfig;

/// Length of the admission window.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_requests_per_minute: u32,
    pub window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            window: WINDOW,
        }
    }
}

impl From<&PipelineConfig> for QueueConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_requests_per_minute: config.max_requests_per_minute,
            window: WINDOW,
        }
    }
}

/// Snapshot of the queue for operational monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Tasks waiting for admission
    pub queued: usize,
    /// Admitted tasks that have not completed yet
    pub in_flight: usize,
    /// Admissions left before the current window is exhausted
    pub remaining_in_window: u32,
    pub window_resets_in: Duration,
}

struct State {
    pending: VecDeque<oneshot::Sender<InFlight>>,
    window_start: Instant,
    admitted_in_window: u32,
    in_flight: usize,
    closed: bool,
}

impl State {
    fn roll_window(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.admitted_in_window = 0;
        }
    }
}

struct Inner {
    config: QueueConfig,
    state: Mutex<State>,
    wake: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit waiting tasks while the window has budget. Returns when the
    /// ticker should look again, or `None` when nothing is waiting.
    fn drain(self: &Arc<Self>) -> Option<Instant> {
        let mut state = self.lock();
        state.roll_window(Instant::now(), self.config.window);

        while state.admitted_in_window < self.config.max_requests_per_minute {
            let Some(waiter) = state.pending.pop_front() else {
                break;
            };
            state.admitted_in_window += 1;
            state.in_flight += 1;
            // A waiter whose caller went away does not consume budget.
            if let Err(mut guard) = waiter.send(InFlight::new(self)) {
                guard.disarm();
                state.admitted_in_window -= 1;
                state.in_flight -= 1;
            }
        }

        if state.pending.is_empty() {
            None
        } else {
            Some(state.window_start + self.config.window)
        }
    }
}

/// Admission ticket. Decrements the in-flight count when the admitted task
/// finishes, or when its caller is dropped before or after picking it up.
struct InFlight {
    inner: Option<Arc<Inner>>,
}

impl InFlight {
    fn new(inner: &Arc<Inner>) -> Self {
        Self {
            inner: Some(Arc::clone(inner)),
        }
    }

    /// The ticket never reached a caller; the admitter undoes its own count.
    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }
}

/// Rate-limited request queue shared by every worker of an ingestion run.
///
/// Must be created inside a tokio runtime: construction spawns the ticker
/// task, which is aborted when the queue is dropped.
pub struct RequestQueue {
    inner: Arc<Inner>,
    ticker: JoinHandle<()>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        let config = QueueConfig {
            max_requests_per_minute: config.max_requests_per_minute.max(1),
            ..config
        };
        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(State {
                pending: VecDeque::new(),
                window_start: Instant::now(),
                admitted_in_window: 0,
                in_flight: 0,
                closed: false,
            }),
            wake: Notify::new(),
        });

        let ticker = tokio::spawn(run_ticker(Arc::clone(&inner)));
        Self { inner, ticker }
    }

    pub fn config(&self) -> QueueConfig {
        self.inner.config
    }

    /// Wait for admission, then run `task` and hand back its result.
    pub async fn enqueue<F, Fut, T, E>(&self, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<QueueError>,
    {
        let _in_flight = self.admit().await?;
        task().await
    }

    async fn admit(&self) -> Result<InFlight, QueueError> {
        let waiter = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.roll_window(Instant::now(), self.inner.config.window);

            if state.pending.is_empty()
                && state.admitted_in_window < self.inner.config.max_requests_per_minute
            {
                state.admitted_in_window += 1;
                state.in_flight += 1;
                return Ok(InFlight::new(&self.inner));
            }

            let (tx, rx) = oneshot::channel();
            state.pending.push_back(tx);
            trace!(queued = state.pending.len(), "Request waiting for admission");
            rx
        };

        self.inner.wake.notify_one();
        waiter.await.map_err(|_| QueueError::Closed)
    }

    pub fn status(&self) -> QueueStatus {
        let now = Instant::now();
        let window = self.inner.config.window;
        let state = self.inner.lock();
        let elapsed = now.duration_since(state.window_start);
        let (remaining, resets_in) = if elapsed >= window {
            (self.inner.config.max_requests_per_minute, Duration::ZERO)
        } else {
            (
                self.inner
                    .config
                    .max_requests_per_minute
                    .saturating_sub(state.admitted_in_window),
                window - elapsed,
            )
        };

        QueueStatus {
            queued: state.pending.len(),
            in_flight: state.in_flight,
            remaining_in_window: remaining,
            window_resets_in: resets_in,
        }
    }

    /// Reject waiting and future tasks with [`QueueError::Closed`].
    pub fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        if dropped > 0 {
            debug!(dropped, "Request queue closed with waiting tasks");
        }
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

async fn run_ticker(inner: Arc<Inner>) {
    loop {
        match inner.drain() {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = inner.wake.notified() => {}
                }
            }
            None => inner.wake.notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn queue(limit: u32) -> RequestQueue {
        RequestQueue::new(QueueConfig {
            max_requests_per_minute: limit,
            window: WINDOW,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_tasks_wait_for_next_window() {
        let queue = queue(60);
        let start = Instant::now();

        let admitted = join_all((0..90).map(|i| {
            let queue = &queue;
            async move {
                queue
                    .enqueue(|| async move { Ok::<_, QueueError>((i, Instant::now() - start)) })
                    .await
            }
        }))
        .await;

        for result in admitted {
            let (i, elapsed) = result.unwrap();
            if i < 60 {
                assert!(elapsed < Duration::from_secs(1), "task {i} admitted at {elapsed:?}");
            } else {
                assert!(elapsed >= Duration::from_secs(60), "task {i} admitted at {elapsed:?}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_is_fifo() {
        let queue = queue(2);
        let order = Mutex::new(Vec::new());

        join_all((0..6).map(|i| {
            let (queue, order) = (&queue, &order);
            async move {
                queue
                    .enqueue(|| async move {
                        order.lock().unwrap().push(i);
                        Ok::<_, QueueError>(())
                    })
                    .await
            }
        }))
        .await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_task_errors_are_returned_without_retry() {
        let queue = queue(10);
        let result: Result<(), QueueError> = queue.enqueue(|| async { Err(QueueError::Closed) }).await;
        assert_eq!(result, Err(QueueError::Closed));

        let status = queue.status();
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.remaining_in_window, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_queue_and_budget() {
        let queue = Arc::new(queue(1));
        queue
            .enqueue(|| async { Ok::<_, QueueError>(()) })
            .await
            .unwrap();

        let waiting = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(|| async { Ok::<_, QueueError>(()) }).await })
        };
        tokio::task::yield_now().await;

        let status = queue.status();
        assert_eq!(status.queued, 1);
        assert_eq!(status.remaining_in_window, 0);
        assert!(status.window_resets_in <= WINDOW);

        waiting.await.unwrap().unwrap();
        assert_eq!(queue.status().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_dropped_after_admission_releases_in_flight() {
        let queue = queue(1);
        queue
            .enqueue(|| async { Ok::<_, QueueError>(()) })
            .await
            .unwrap();

        let mut waiting = Box::pin(queue.enqueue(|| async { Ok::<_, QueueError>(()) }));
        assert!(futures::poll!(waiting.as_mut()).is_pending());
        assert_eq!(queue.status().queued, 1);

        // The ticker admits the waiter when the window rolls over, but the
        // waiting future is never polled again.
        tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;
        let status = queue.status();
        assert_eq!(status.queued, 0);
        assert_eq!(status.in_flight, 1);

        drop(waiting);
        assert_eq!(queue.status().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_dropped_before_admission_uses_no_budget() {
        let queue = queue(1);
        queue
            .enqueue(|| async { Ok::<_, QueueError>(()) })
            .await
            .unwrap();

        let mut waiting = Box::pin(queue.enqueue(|| async { Ok::<_, QueueError>(()) }));
        assert!(futures::poll!(waiting.as_mut()).is_pending());
        drop(waiting);

        tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;
        let status = queue.status();
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.remaining_in_window, 1);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_tasks() {
        let queue = queue(1);
        queue.close();
        let result = queue.enqueue(|| async { Ok::<_, QueueError>(()) }).await;
        assert_eq!(result, Err(QueueError::Closed));
    }
}
