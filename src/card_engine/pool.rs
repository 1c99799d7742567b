//! Prefetching card pool.
//!
//! [`CardPool`] keeps a FIFO buffer of ready cards close to `target_size`.
//! A background control loop watches the buffer and launches refill workers
//! (see [`refill`](super::refill)) whenever it drops below
//! `refill_threshold`, keeping at most `max_concurrency` source calls in
//! flight. Consumers only ever touch the buffer through [`CardPool::take_one`].
//!
//! All mutable state (buffer, in-flight counters, health, stats) lives in one
//! [`PoolState`] behind a single mutex; every threshold decision is made while
//! holding it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::card_engine::{
    models::Card,
    refill::{run_refill, InFlightSlot, RefillOutcome},
    source::CardSource,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub target_size: usize,
    pub refill_threshold: usize,
    /// Largest number of cards requested from the source in one call.
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Upper bound on a single source call, on top of the source's own timeout.
    pub call_timeout: Duration,
    /// Pause before scheduling again after a cycle that produced no cards.
    pub failure_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_size: 25,
            refill_threshold: 10,
            batch_size: 1,
            max_concurrency: 1,
            call_timeout: Duration::from_secs(90),
            failure_cooldown: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("target_size must be >= 1")]
    ZeroTarget,
    #[error("refill_threshold ({threshold}) must be lower than target_size ({target})")]
    ThresholdNotBelowTarget { threshold: usize, target: usize },
    #[error("batch_size must be >= 1")]
    ZeroBatch,
    #[error("max_concurrency must be >= 1")]
    ZeroConcurrency,
    #[error("call_timeout must be non-zero")]
    ZeroCallTimeout,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_size == 0 {
            return Err(ConfigError::ZeroTarget);
        }
        if self.refill_threshold >= self.target_size {
            return Err(ConfigError::ThresholdNotBelowTarget {
                threshold: self.refill_threshold,
                target: self.target_size,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ZeroCallTimeout);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consumer-facing types
// ---------------------------------------------------------------------------

/// No card became available in time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no card available after waiting {waited:?}")]
pub struct PoolExhausted {
    pub waited: Duration,
    /// The source failed permanently; waiting longer will not help.
    pub source_unavailable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceHealth {
    #[default]
    Available,
    Unavailable { reason: String },
}

impl SourceHealth {
    pub fn is_available(&self) -> bool {
        matches!(self, SourceHealth::Available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub cards_produced: u64,
    pub cards_served: u64,
    /// Candidates dropped because they could not be coerced into a card.
    pub invalid_candidates: u64,
    /// Cycles that delivered at least one card.
    pub successful_cycles: u64,
    /// Cycles that ended in an error after their retries.
    pub failed_cycles: u64,
    /// Source calls beyond the first attempt of a cycle.
    pub retries: u64,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    pub(crate) buffer: VecDeque<Card>,
    /// Source calls currently executing; never above `max_concurrency`.
    pub(crate) in_flight: usize,
    /// Sum of batch sizes requested by in-flight calls.
    pub(crate) cards_in_flight: usize,
    /// Set on drawdown below the threshold, cleared once the target is reached.
    refilling: bool,
    cooldown_until: Option<Instant>,
    pub(crate) health: SourceHealth,
    pub(crate) stats: PoolStats,
}

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    pub(crate) source: Arc<dyn CardSource>,
    state: Mutex<PoolState>,
    /// Signalled whenever cards are appended.
    cards_ready: Notify,
    /// Wakes the control loop.
    pub(crate) wake: Notify,
}

impl PoolInner {
    pub(crate) fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide which refill calls to launch now, reserving their slots.
    fn plan_refills(&self) -> Vec<usize> {
        let cfg = &self.config;
        let mut state = self.state();

        if !state.health.is_available() {
            return Vec::new();
        }
        if !state.refilling {
            if state.buffer.len() >= cfg.refill_threshold {
                return Vec::new();
            }
            debug!(
                "buffer at {} (< {}), starting refill",
                state.buffer.len(),
                cfg.refill_threshold
            );
            state.refilling = true;
        }
        if let Some(until) = state.cooldown_until {
            if Instant::now() < until {
                return Vec::new();
            }
            state.cooldown_until = None;
        }

        let mut batches = Vec::new();
        loop {
            let committed = state.buffer.len() + state.cards_in_flight;
            if committed >= cfg.target_size || state.in_flight >= cfg.max_concurrency {
                break;
            }
            let batch = cfg.batch_size.min(cfg.target_size - committed);
            state.in_flight += 1;
            state.cards_in_flight += batch;
            batches.push(batch);
        }

        if state.buffer.len() >= cfg.target_size && state.in_flight == 0 {
            state.refilling = false;
        }
        batches
    }

    /// Fold a finished cycle into the pool state and release its slot.
    pub(crate) fn complete_cycle(&self, batch: usize, outcome: RefillOutcome) {
        let added = outcome.cards.len();
        let mut became_unavailable = false;
        {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.cards_in_flight = state.cards_in_flight.saturating_sub(batch);
                        state.stats.invalid_candidates += outcome.invalid as u64;
            state.stats.retries += u64::from(outcome.attempts.saturating_sub(1));
            state.stats.cards_produced += added as u64;
            state.buffer.extend(outcome.cards);

            match outcome.error {
                None => {
                    state.stats.successful_cycles += 1;
                    debug!(
                        "refill cycle added {} cards (buffer {}/{})",
                        added,
                        state.buffer.len(),
                        self.config.target_size
                    );
                }
                Some(e) if e.is_permanent() => {
                    state.stats.failed_cycles += 1;
                    error!("{} source unavailable: {}", self.source.name(), e);
                    state.health = SourceHealth::Unavailable { reason: e.to_string() };
                    became_unavailable = true;
                }
                Some(e) => {
                    state.stats.failed_cycles += 1;
                    warn!(
                        "refill cycle failed after {} attempt(s): {}",
                        outcome.attempts, e
                    );
                    state.cooldown_until = Some(Instant::now() + self.config.failure_cooldown);
                }
            }
        }
        // Waiting consumers re-check: either a card is there or the source is gone.
        if added > 0 || became_unavailable {
            self.cards_ready.notify_waiters();
        }
        self.wake.notify_one();
    }

    /// Release the slot of a refill that was aborted before completing.
    pub(crate) fn release_slot(&self, batch: usize) {
        {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.cards_in_flight = state.cards_in_flight.saturating_sub(batch);
        }
        self.wake.notify_one();
    }

    /// Pop the front card, or report why none was available.
    fn try_pop(&self) -> Result<Card, bool> {
        let mut state = self.state();
        match state.buffer.pop_front() {
            Some(card) => {
                state.stats.cards_served += 1;
                let drawdown = state.buffer.len() < self.config.refill_threshold;
                let signal = drawdown && !state.refilling;
                drop(state);
                if signal {
                    self.wake.notify_one();
                }
                Ok(card)
            }
            None => {
                let unavailable = !state.health.is_available();
                // An empty buffer always warrants a refill, whatever the threshold.
                let signal = !unavailable && !state.refilling;
                state.refilling |= signal;
                drop(state);
                if signal {
                    self.wake.notify_one();
                }
                Err(unavailable)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CardPool
// ---------------------------------------------------------------------------

pub struct CardPool {
    inner: Arc<PoolInner>,
    shutdown: watch::Sender<bool>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl CardPool {
    /// Build a pool around `source`. Nothing is fetched until [`start`](Self::start).
    pub fn new(source: Arc<dyn CardSource>, config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                source,
                state: Mutex::new(PoolState::default()),
                cards_ready: Notify::new(),
                wake: Notify::new(),
            }),
            shutdown,
            control: Mutex::new(None),
        })
    }

    /// Spawn the control loop and begin the initial fill. Must be called from
    /// within a tokio runtime; calling it twice is a no-op.
    pub fn start(&self) {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.is_some() {
            return;
        }
        self.inner.state().refilling = true;
        info!(
            "starting {} card pool (target {}, threshold {}, batch {}, concurrency {})",
            self.inner.source.name(),
            self.inner.config.target_size,
            self.inner.config.refill_threshold,
            self.inner.config.batch_size,
            self.inner.config.max_concurrency,
        );
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.subscribe();
        *control = Some(tokio::spawn(control_loop(inner, shutdown)));
    }

    /// Stop the control loop and abort in-flight refills. Cards already in
    /// the buffer stay servable.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("card pool control loop ended abnormally: {e}");
            }
        }
    }

    /// Take the oldest ready card, waiting up to `wait` for one to arrive.
    pub async fn take_one(&self, wait: Duration) -> Result<Card, PoolExhausted> {
        let started = Instant::now();
        // `None` when `wait` runs past the end of the clock: wait without a deadline.
        let deadline = started.checked_add(wait);
        loop {
            // Register interest before looking so an append in between is not missed.
            let notified = self.inner.cards_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.try_pop() {
                Ok(card) => return Ok(card),
                Err(true) => {
                    return Err(PoolExhausted {
                        waited: started.elapsed(),
                        source_unavailable: true,
                    })
                }
                Err(false) => {}
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return self.inner.try_pop().map_err(|unavailable| PoolExhausted {
                            waited: started.elapsed(),
                            source_unavailable: unavailable,
                        });
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state().in_flight
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.state().stats.clone()
    }

    pub fn health(&self) -> SourceHealth {
        self.inner.state().health.clone()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Cards buffered plus cards requested by in-flight calls.
    #[cfg(test)]
    pub(crate) fn committed_cards(&self) -> usize {
        let state = self.inner.state();
        state.buffer.len() + state.cards_in_flight
    }
}

impl Drop for CardPool {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn control_loop(inner: Arc<PoolInner>, mut shutdown: watch::Receiver<bool>) {
    let mut workers = JoinSet::new();
    loop {
        for batch in inner.plan_refills() {
            debug!("launching refill worker for {} cards", batch);
            let slot = InFlightSlot::new(Arc::clone(&inner), batch);
            workers.spawn(run_refill(slot));
        }

        let cooldown = inner.state().cooldown_until;
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = inner.wake.notified() => {}
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("refill worker panicked: {e}");
                    }
                }
            }
            _ = sleep_until(cooldown.unwrap_or_else(Instant::now)), if cooldown.is_some() => {}
        }
    }
    workers.shutdown().await;
    debug!("card pool control loop stopped");
}
