//! One refill cycle: a single source call with bounded retry.
//!
//! The control loop reserves an in-flight slot under the pool lock and hands
//! it to [`run_refill`] as an [`InFlightSlot`]. The worker calls the source
//! (retrying per the source's [`RetryPolicy`](super::source::RetryPolicy)),
//! coerces the candidates, and gives the slot back together with the result.
//! If the task is aborted or panics the slot is released on drop, so the
//! in-flight count can never leak.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::card_engine::{
    models::{coerce_candidates, Card},
    pool::PoolInner,
    source::{CardSource, SourceError},
};

/// Result of one refill cycle. `error` is set when no card was produced.
#[derive(Debug, Default)]
pub(crate) struct RefillOutcome {
    pub(crate) cards: Vec<Card>,
    pub(crate) invalid: usize,
    pub(crate) attempts: u32,
    pub(crate) error: Option<SourceError>,
}

/// A reserved in-flight source call.
pub(crate) struct InFlightSlot {
    inner: Arc<PoolInner>,
    batch: usize,
    released: bool,
}

impl InFlightSlot {
    pub(crate) fn new(inner: Arc<PoolInner>, batch: usize) -> Self {
        Self { inner, batch, released: false }
    }

    fn finish(mut self, outcome: RefillOutcome) {
        self.released = true;
        self.inner.complete_cycle(self.batch, outcome);
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if !self.released {
            debug!("refill of {} cards aborted", self.batch);
            self.inner.release_slot(self.batch);
        }
    }
}

pub(crate) async fn run_refill(slot: InFlightSlot) {
    let outcome = produce_with_retry(
        slot.inner.source.as_ref(),
        slot.batch,
        slot.inner.config.call_timeout,
    )
    .await;
    slot.finish(outcome);
}

/// Call `source` until it yields at least one valid card, a permanent error
/// occurs, or the retry budget is spent.
pub(crate) async fn produce_with_retry(
    source: &dyn CardSource,
    batch: usize,
    call_timeout: Duration,
) -> RefillOutcome {
    let policy = source.retry_policy();
    let mut outcome = RefillOutcome::default();

    loop {
        outcome.attempts += 1;
        let result = match timeout(call_timeout, source.produce_batch(batch)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(call_timeout)),
        };

        let error = match result {
            Ok(candidates) => {
                let (mut cards, rejected) = coerce_candidates(candidates);
                outcome.invalid += rejected;
                if rejected > 0 {
                    debug!("{} source: dropped {} invalid candidate(s)", source.name(), rejected);
                }
                if !cards.is_empty() {
                    if cards.len() > batch {
                        debug!("{} source over-delivered {} cards for batch {}", source.name(), cards.len(), batch);
                        cards.truncate(batch);
                    }
                    outcome.cards = cards;
                    return outcome;
                }
                SourceError::Empty
            }
            Err(e) => e,
        };

        if error.is_permanent() || outcome.attempts >= policy.max_attempts {
            outcome.error = Some(error);
            return outcome;
        }

        let delay = policy.backoff(outcome.attempts);
        warn!(
            "{} source attempt {}/{} failed: {}; retrying in {:?}",
            source.name(),
            outcome.attempts,
            policy.max_attempts,
            error,
            delay
        );
        sleep(delay).await;
    }
}
