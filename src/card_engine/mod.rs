//! Card engine: sources, validation, and the prefetching pool.
//!
//! ## Module overview
//!
//! | Module       | Purpose |
//! |--------------|---------|
//! | `models`     | `Card`, raw source candidates, and coercion between them |
//! | `source`     | `CardSource` trait, `SourceError` classification, `RetryPolicy` |
//! | `pool`       | `CardPool`: FIFO buffer, control loop, `take_one` |
//! | `refill`     | One refill cycle: timed source call with bounded retry |
//! | `parse`      | Candidate extraction from free-form LLM replies |
//! | `style`      | Party-game style filter for LLM candidates |
//! | `llm`        | Chat-completions client and the LLM-backed source |
//! | `csv_loader` | Loading cards from a directory of CSV files |
//! | `deck`       | Shuffled deck over loaded cards and the CSV-backed source |

pub mod csv_loader;
pub mod deck;
pub mod llm;
pub mod models;
pub mod parse;
pub mod pool;
pub(crate) mod refill;
pub mod source;
pub mod style;

// Re-export the public API surface so callers can use
// `card_engine::CardPool` without reaching into sub-modules.
pub use csv_loader::{load_cards_from_csv_dir, parse_delimiter, CsvLoadError};
pub use deck::{CsvCardSource, CsvDeck, DeckMode};
pub use llm::{CompletionClient, LlmCardSource, LlmConfig, LlmError, OpenAiCompatibleClient};
pub use models::{AnswerValue, Card, InvalidCandidate, RawCardCandidate};
pub use pool::{CardPool, ConfigError, PoolConfig, PoolExhausted, PoolStats, SourceHealth};
pub use source::{CardSource, RetryPolicy, SourceError};
