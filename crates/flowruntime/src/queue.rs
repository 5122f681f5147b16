//! Per-node admission control.
//!
//! A [`NodeQueue`] admits executions FIFO under three independent limits:
//! a concurrency cap (fair `Semaphore`), an admissions-per-window rate
//! (fixed windows, like an interval cap), and a per-execution timeout.
//! Every limit is optional; zero values count as "unbounded".

use flowcore::{NodeError, QueueConfig};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, timeout, Duration, Instant};

pub struct NodeQueue {
    id: String,
    slots: Option<Arc<Semaphore>>,
    window: Option<RateWindow>,
    timeout: Option<Duration>,
    waiting: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

struct RateWindow {
    limit: usize,
    period: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    /// Start of the current window; opened by the first admission after the previous one expired.
    started: Option<Instant>,
    admitted: usize,
}

/// Counts a caller in `waiting` until admitted or abandoned.
struct Waiting(Arc<AtomicUsize>);

impl Waiting {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held for as long as an admitted execution runs; dropping it frees the slot.
pub struct Admission {
    _permit: Option<OwnedSemaphorePermit>,
    running: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NodeQueue {
    pub fn new(id: impl Into<String>, config: Option<&QueueConfig>) -> Self {
        let id = id.into();
        let default = QueueConfig::default();
        let config = config.unwrap_or(&default);

        let slots = config
            .concurrency
            .filter(|&n| n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        let window = match (config.interval_limit, config.interval_time_ms) {
            (Some(limit), Some(ms)) if limit > 0 && ms > 0 => Some(RateWindow {
                limit,
                period: Duration::from_millis(ms),
                state: Mutex::new(WindowState {
                    started: None,
                    admitted: 0,
                }),
            }),
            _ => None,
        };

        let timeout = config
            .timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);

        Self {
            id,
            slots,
            window,
            timeout,
            waiting: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait until every limit allows one more execution.
    pub async fn admit(&self) -> Admission {
        let waiting = Waiting::enter(&self.waiting);

        let permit = match &self.slots {
            // the semaphore is never closed, so acquisition only fails if that changes
            Some(slots) => slots.clone().acquire_owned().await.ok(),
            None => None,
        };
        if let Some(window) = &self.window {
            window.wait_turn(&self.id).await;
        }

        drop(waiting);
        self.running.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("queue:{} admitted ({} running)", self.id, self.running());

        Admission {
            _permit: permit,
            running: self.running.clone(),
        }
    }

    /// Run one execution under the configured timeout.
    pub async fn timed<T, F>(&self, fut: F) -> Result<T, NodeError>
    where
        F: Future<Output = Result<T, NodeError>>,
    {
        match self.timeout {
            Some(limit) => match timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout {
                    ms: limit.as_millis() as u64,
                }),
            },
            None => fut.await,
        }
    }

    /// Executions waiting for admission.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Executions admitted and not yet released.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

impl RateWindow {
    async fn wait_turn(&self, id: &str) {
        // holding the lock while sleeping keeps later waiters behind us
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let current = state.started;
            match current {
                Some(started) if now.duration_since(started) < self.period => {
                    if state.admitted < self.limit {
                        state.admitted += 1;
                        return;
                    }
                    tracing::debug!("queue:{} rate limited, waiting for next window", id);
                    sleep_until(started + self.period).await;
                }
                _ => {
                    state.started = Some(now);
                    state.admitted = 1;
                    return;
                }
            }
        }
    }
}
