use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::card_engine::{
    models::{Card, RawCardCandidate},
    source::{CardSource, SourceError},
};

/// What the deck does after the last card of a pass has been dealt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeckMode {
    /// Reshuffle and start a new pass.
    #[default]
    Cycle,
    /// Report exhaustion; the deck never deals again.
    Once,
}

/// A pre-loaded set of cards dealt in shuffled order.
pub struct CsvDeck {
    cards: Vec<Card>,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
    mode: DeckMode,
}

impl CsvDeck {
    /// Shuffle `cards` with an entropy-seeded RNG, or a fixed one when `seed` is given.
    pub fn new(cards: Vec<Card>, mode: DeckMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut deck = CsvDeck {
            order: (0..cards.len()).collect(),
            cards,
            cursor: 0,
            rng,
            mode,
        };
        deck.shuffle();
        deck
    }

    fn shuffle(&mut self) {
        // Fisher-Yates over the index order
        for i in (1..self.order.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            self.order.swap(i, j);
        }
        self.cursor = 0;
    }

    /// Deal up to `n` cards. In `Cycle` mode a new pass starts whenever the
    /// current one runs out, so no card repeats within a pass. In `Once` mode
    /// a short final batch is returned before `Exhausted`.
    pub fn deal_n(&mut self, n: usize) -> Result<Vec<Card>, SourceError> {
        if self.cards.is_empty() {
            return Err(SourceError::Exhausted("CSV deck is empty".into()));
        }
        let mut dealt = Vec::with_capacity(n);
        while dealt.len() < n {
            if self.cursor >= self.order.len() {
                match self.mode {
                    DeckMode::Cycle => self.shuffle(),
                    DeckMode::Once => break,
                }
            }
            dealt.push(self.cards[self.order[self.cursor]].clone());
            self.cursor += 1;
        }
        if dealt.is_empty() {
            return Err(SourceError::Exhausted(format!(
                "all {} CSV cards have been dealt",
                self.cards.len()
            )));
        }
        Ok(dealt)
    }

    /// Cards left in the current pass.
    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// [`CardSource`] over a [`CsvDeck`].
pub struct CsvCardSource {
    deck: Mutex<CsvDeck>,
}

impl CsvCardSource {
    pub fn new(deck: CsvDeck) -> Self {
        Self { deck: Mutex::new(deck) }
    }
}

#[async_trait]
impl CardSource for CsvCardSource {
    async fn produce_batch(&self, count: usize) -> Result<Vec<RawCardCandidate>, SourceError> {
        let mut deck = self.deck.lock().unwrap_or_else(PoisonError::into_inner);
        let cards = deck.deal_n(count)?;
        Ok(cards.into_iter().map(RawCardCandidate::from).collect())
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn cards(n: usize) -> Vec<Card> {
        (1..=n)
            .map(|i| Card {
                question: format!("Q{i}?"),
                answer: i as f64,
                explanation: "e".into(),
            })
            .collect()
    }

    #[test]
    fn cycle_mode_has_no_repeats_within_a_pass() {
        let mut deck = CsvDeck::new(cards(5), DeckMode::Cycle, Some(0));
        let first: Vec<String> = deck.deal_n(5).unwrap().into_iter().map(|c| c.question).collect();
        assert_eq!(first.iter().collect::<HashSet<_>>().len(), 5);
        assert_eq!(deck.remaining(), 0);

        // Next pass starts transparently.
        let next = deck.deal_n(1).unwrap();
        assert!(first.contains(&next[0].question));
        assert_eq!(deck.remaining(), 4);
    }

    #[test]
    fn cycle_mode_batches_may_span_passes() {
        let mut deck = CsvDeck::new(cards(3), DeckMode::Cycle, Some(1));
        assert_eq!(deck.deal_n(7).unwrap().len(), 7);
    }

    #[test]
    fn once_mode_returns_short_batch_then_exhausts() {
        let mut deck = CsvDeck::new(cards(3), DeckMode::Once, Some(2));
        assert_eq!(deck.deal_n(2).unwrap().len(), 2);
        assert_eq!(deck.deal_n(2).unwrap().len(), 1);
        let err = deck.deal_n(1).unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn deck_is_deterministic_with_seed() {
        let make = |seed: u64| -> Vec<String> {
            let mut deck = CsvDeck::new(cards(20), DeckMode::Once, Some(seed));
            deck.deal_n(20).unwrap().into_iter().map(|c| c.question).collect()
        };
        assert_eq!(make(99), make(99));
        assert_ne!(make(99), make(100));
    }

    #[tokio::test]
    async fn source_yields_valid_candidates() {
        let source = CsvCardSource::new(CsvDeck::new(cards(4), DeckMode::Once, Some(3)));
        let batch = source.produce_batch(4).await.unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|c| Card::try_from(c.clone()).is_ok()));
        assert!(matches!(source.produce_batch(1).await, Err(SourceError::Exhausted(_))));
    }
}
