//! Resilience layer wrapping the channel adapters. §4.F.
//!
//! Each adapter gets its own circuit breaker instance (own mutex, own
//! thresholds) rather than a shared generic store — the same separation the
//! reference server uses for its independent `rl_key` / `rl_geo`
//! `DashMap`s.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::SharedClock;
use serde_json::Value as Frame;
use tracing::{info, warn};

// ---------------------------------------------------------------------
// Retry with exponential backoff
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` up to `max_attempts` times, sleeping with exponential
    /// backoff between attempts while `should_retry` returns true for the
    /// error. Returns the last error if all attempts are exhausted.
    pub async fn run<F, Fut, T, E>(&self, should_retry: impl Fn(&E) -> bool, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= self.max_attempts || !should_retry(&e) {
                        return Err(e);
                    }
                    tokio::time::sleep(delay).await;
                    let next = delay.as_secs_f64() * self.multiplier;
                    delay = Duration::from_secs_f64(next).min(self.max_delay);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    opened_at_ms: AtomicU64,
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: SharedClock,
    name: &'static str,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, reset_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            failure_threshold,
            reset_timeout,
            clock,
            name,
        }
    }

    pub fn external_msg(clock: SharedClock) -> Self {
        Self::new("external-msg", 5, Duration::from_secs(60), clock)
    }

    pub fn realtime(clock: SharedClock) -> Self {
        Self::new("realtime", 10, Duration::from_secs(30), clock)
    }

    pub fn push(clock: SharedClock) -> Self {
        Self::new("push", 5, Duration::from_secs(60), clock)
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Returns true if a call may proceed; transitions OPEN -> HALF_OPEN
    /// once the reset timeout has elapsed.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let now = self.clock.now_ms() as u64;
                let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
                if now.saturating_sub(opened_at) >= self.reset_timeout.as_millis() as u64 {
                    self.state.store(STATE_HALF_OPEN, Ordering::SeqCst);
                    info!(breaker = self.name, "circuit_half_open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= 2 {
                    self.state.store(STATE_CLOSED, Ordering::SeqCst);
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    self.consecutive_successes.store(0, Ordering::SeqCst);
                    info!(breaker = self.name, "circuit_closed");
                }
            }
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                self.trip();
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    self.trip();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self) {
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.opened_at_ms.store(self.clock.now_ms() as u64, Ordering::SeqCst);
        warn!(breaker = self.name, "circuit_open");
    }
}

// ---------------------------------------------------------------------
// Offline buffer for realtime frames
// ---------------------------------------------------------------------

const OFFLINE_BUFFER_CAP: usize = 1_000;
const OFFLINE_BUFFER_MAX_AGE_MS: i64 = 60 * 60 * 1000;

#[derive(Clone, Debug)]
pub struct BufferedFrame {
    pub user_id: String,
    pub frame: Frame,
    pub enqueued_at_ms: i64,
    pub attempts: u32,
}

pub struct OfflineBuffer {
    queue: Mutex<VecDeque<BufferedFrame>>,
    clock: SharedClock,
}

impl OfflineBuffer {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    pub fn enqueue(&self, user_id: String, frame: Frame) {
        let mut q = self.queue.lock().expect("offline buffer mutex poisoned");
        if q.len() >= OFFLINE_BUFFER_CAP {
            q.pop_front();
        }
        q.push_back(BufferedFrame {
            user_id,
            frame,
            enqueued_at_ms: self.clock.now_ms(),
            attempts: 0,
        });
    }

    /// Removes and returns every buffered frame for `user_id`, in FIFO
    /// order, for replay on reconnect.
    pub fn drain_for_user(&self, user_id: &str) -> Vec<BufferedFrame> {
        let mut q = self.queue.lock().expect("offline buffer mutex poisoned");
        let (matching, rest): (VecDeque<_>, VecDeque<_>) =
            q.drain(..).partition(|f| f.user_id == user_id);
        *q = rest;
        matching.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("offline buffer mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries older than the 1 hour age cap. Runs every 60s from a
    /// background task, mirroring the reference server's `eviction` loop.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut q = self.queue.lock().expect("offline buffer mutex poisoned");
        let before = q.len();
        q.retain(|f| now.saturating_sub(f.enqueued_at_ms) < OFFLINE_BUFFER_MAX_AGE_MS);
        before - q.len()
    }
}

pub async fn run_offline_buffer_eviction(buffer: std::sync::Arc<OfflineBuffer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let evicted = buffer.evict_expired();
        if evicted > 0 {
            info!(evicted, remaining = buffer.len(), "offline_buffer_eviction");
        }
    }
}
