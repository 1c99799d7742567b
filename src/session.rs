//! Per-player game state shared by the terminal and web front ends.

use std::time::Duration;

use number_cards::{Card, CardPool, PoolExhausted};

/// Wait budget for one `take_one` when the pool reports a non-empty buffer.
pub const SHORT_WAIT: Duration = Duration::from_millis(200);

/// How long to wait for a card: `when_empty` if nothing is buffered right now.
pub fn wait_budget(pool: &CardPool, when_empty: Duration) -> Duration {
    if pool.is_empty() {
        when_empty
    } else {
        SHORT_WAIT
    }
}

/// Player-facing text for a failed draw.
pub fn exhausted_message(err: &PoolExhausted) -> &'static str {
    if err.source_unavailable {
        "The question source is unavailable. No more cards can be drawn."
    } else {
        "No card ready yet, the pool is refilling. Try again in a moment."
    }
}

pub enum Reveal<'a> {
    NoCard,
    Revealed(&'a Card),
    AlreadyRevealed,
}

#[derive(Debug, Default)]
pub struct Session {
    current: Option<Card>,
    revealed: bool,
    shown: u64,
}

impl Session {
    pub fn current(&self) -> Option<&Card> {
        self.current.as_ref()
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    /// Cards shown since the session started.
    pub fn shown(&self) -> u64 {
        self.shown
    }

    pub fn show(&mut self, card: Card) {
        self.current = Some(card);
        self.revealed = false;
        self.shown += 1;
    }

    /// Reveal the answer of the current card; only the first call reveals.
    pub fn reveal(&mut self) -> Reveal<'_> {
        match &self.current {
            None => Reveal::NoCard,
            Some(_) if self.revealed => Reveal::AlreadyRevealed,
            Some(card) => {
                self.revealed = true;
                Reveal::Revealed(card)
            }
        }
    }
}
