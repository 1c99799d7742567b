//! # number_cards
//!
//! Trivia cards with numeric answers for a "guess the number" party game,
//! served from a prefetching in-memory pool.
//!
//! Generating a card with an LLM takes seconds and sometimes fails, so the
//! user-facing path never talks to the source directly. A [`CardPool`] keeps a
//! buffer of ready cards topped up in the background and consumers take cards
//! from it with a bounded wait.
//!
//! ## How it works
//!
//! 1. Pick a [`CardSource`]: [`LlmCardSource`] over an OpenAI-compatible
//!    chat-completions endpoint, or [`CsvCardSource`] over a directory of CSV
//!    files.
//! 2. Build a [`CardPool`] with a [`PoolConfig`] (target size, refill
//!    threshold, batch size, concurrency) and call [`CardPool::start`].
//! 3. Call [`CardPool::take_one`] whenever the player asks for the next
//!    question. An empty pool waits for the next refill up to the given
//!    timeout and then fails with [`PoolExhausted`].
//!
//! Source failures never reach consumers: they are retried, logged and
//! counted in [`PoolStats`]. A source that can never deliver again (a
//! non-cycling CSV deck that ran out) flips [`CardPool::health`] to
//! [`SourceHealth::Unavailable`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::{path::Path, sync::Arc, time::Duration};
//! use number_cards::{
//!     load_cards_from_csv_dir, CardPool, CsvCardSource, CsvDeck, DeckMode, PoolConfig,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let cards = load_cards_from_csv_dir(Path::new("questions"), b';')?;
//! let source = Arc::new(CsvCardSource::new(CsvDeck::new(cards, DeckMode::Cycle, None)));
//! let pool = CardPool::new(source, PoolConfig::default())?;
//! pool.start();
//!
//! let card = pool.take_one(Duration::from_secs(3)).await?;
//! println!("{} -> {}", card.question, card.answer_display());
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod card_engine;

// Convenience re-exports so callers can use `number_cards::CardPool`
// directly without reaching into `card_engine::`.
pub use card_engine::{
    load_cards_from_csv_dir, parse_delimiter, AnswerValue, Card, CardPool, CardSource,
    CompletionClient, ConfigError, CsvCardSource, CsvDeck, CsvLoadError, DeckMode,
    InvalidCandidate, LlmCardSource, LlmConfig, LlmError, OpenAiCompatibleClient, PoolConfig,
    PoolExhausted, PoolStats, RawCardCandidate, RetryPolicy, SourceError, SourceHealth,
};
