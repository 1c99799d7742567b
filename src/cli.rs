// ---------------------------------------------------------------------------
// Command line: every flag can also come from the environment, so a `.env`
// loaded by the shell or process manager configures the game unchanged.
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};

use number_cards::{
    load_cards_from_csv_dir, parse_delimiter, CardPool, CardSource, CsvCardSource, CsvDeck,
    DeckMode, LlmCardSource, LlmConfig, OpenAiCompatibleClient, PoolConfig,
};

use crate::{terminal, web};

/// File named by `ENV_FILE`, `.env` when unset or blank.
pub fn env_file_name() -> String {
    std::env::var("ENV_FILE")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| ".env".to_string())
}

/// Load `KEY=value` pairs from `path` into the environment before flags are
/// parsed. Variables that are already set win; a missing file is not an error.
pub fn load_env_file(path: &str) {
    match dotenvy::from_filename(path) {
        Ok(loaded) => debug!("loaded environment from {}", loaded.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("ignoring {path}: {e}"),
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "number-cards",
    version,
    about = "Party quiz with numeric answers, served from a prefetching card pool."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub pool: PoolArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play in the terminal.
    Play,
    /// Serve the game over HTTP.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "WEB_HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "WEB_PORT", default_value_t = 8001)]
    pub port: u16,
    /// Accept `POST /shutdown` to stop the server.
    #[arg(long, env = "WEB_ALLOW_SHUTDOWN")]
    pub allow_shutdown: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Llm,
    Csv,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvMode {
    /// Reshuffle after every full pass.
    Cycle,
    /// Deal every card once, then stop.
    Once,
}

impl From<CsvMode> for DeckMode {
    fn from(mode: CsvMode) -> Self {
        match mode {
            CsvMode::Cycle => DeckMode::Cycle,
            CsvMode::Once => DeckMode::Once,
        }
    }
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    #[arg(long = "source", env = "QUESTION_SOURCE", value_enum, ignore_case = true)]
    pub kind: SourceKind,

    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,
    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,
    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.7)]
    pub llm_temperature: f32,
    /// 0 leaves `max_tokens` out of the request.
    #[arg(long, env = "LLM_MAX_TOKENS", default_value_t = 256)]
    pub llm_max_tokens: u32,
    #[arg(long, env = "LLM_TIMEOUT_SECONDS", default_value_t = 30)]
    pub llm_timeout_seconds: u64,
    #[arg(long, env = "LLM_MAX_RETRIES", default_value_t = 5)]
    pub llm_max_retries: u32,
    #[arg(long, env = "LLM_CHAT_COMPLETIONS_PATH", default_value = "/v1/chat/completions")]
    pub llm_chat_completions_path: String,
    /// `none` or `null` leaves `response_format` out of the request.
    #[arg(long, env = "LLM_RESPONSE_FORMAT", default_value = "none")]
    pub llm_response_format: String,
    #[arg(long, env = "LLM_LANGUAGE", default_value = "Polish")]
    pub llm_language: String,

    #[arg(long, env = "CSV_QUESTIONS_DIR")]
    pub csv_dir: Option<PathBuf>,
    #[arg(long, env = "CSV_DELIMITER", default_value = ";")]
    pub csv_delimiter: String,
    #[arg(long, env = "CSV_MODE", value_enum, default_value = "cycle", ignore_case = true)]
    pub csv_mode: CsvMode,
}

#[derive(Args, Debug)]
pub struct PoolArgs {
    #[arg(long, env = "POOL_TARGET_SIZE", default_value_t = 25)]
    pub pool_target_size: usize,
    #[arg(long, env = "POOL_REFILL_THRESHOLD", default_value_t = 10)]
    pub pool_refill_threshold: usize,
    #[arg(long, env = "POOL_BATCH_SIZE", default_value_t = 1)]
    pub pool_batch_size: usize,
    #[arg(long, env = "POOL_CONCURRENCY", default_value_t = 1)]
    pub pool_concurrency: usize,
    #[arg(long, env = "POOL_CALL_TIMEOUT_SECONDS", default_value_t = 90)]
    pub pool_call_timeout_seconds: u64,
    #[arg(long, env = "POOL_FAILURE_COOLDOWN_MS", default_value_t = 2000)]
    pub pool_failure_cooldown_ms: u64,
}

impl From<&PoolArgs> for PoolConfig {
    fn from(args: &PoolArgs) -> Self {
        PoolConfig {
            target_size: args.pool_target_size,
            refill_threshold: args.pool_refill_threshold,
            batch_size: args.pool_batch_size,
            max_concurrency: args.pool_concurrency,
            call_timeout: Duration::from_secs(args.pool_call_timeout_seconds),
            failure_cooldown: Duration::from_millis(args.pool_failure_cooldown_ms),
        }
    }
}

/// Blank strings from the environment count as unset.
fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SourceArgs {
    pub fn llm_config(&self) -> Result<LlmConfig> {
        let base_url = non_blank(&self.llm_base_url)
            .context("LLM_BASE_URL is required when QUESTION_SOURCE=llm")?;
        let model =
            non_blank(&self.llm_model).context("LLM_MODEL is required when QUESTION_SOURCE=llm")?;

        let response_format = match self.llm_response_format.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "null" => None,
            other => Some(other.to_string()),
        };

        Ok(LlmConfig {
            api_key: non_blank(&self.llm_api_key),
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
            timeout: Duration::from_secs(self.llm_timeout_seconds),
            max_retries: self.llm_max_retries,
            chat_completions_path: self.llm_chat_completions_path.clone(),
            response_format,
            language: self.llm_language.clone(),
            ..LlmConfig::new(base_url, model)
        })
    }

    pub fn build(&self) -> Result<Arc<dyn CardSource>> {
        match self.kind {
            SourceKind::Llm => {
                let config = self.llm_config()?;
                info!("using LLM source {} ({})", config.model, config.chat_completions_url());
                let client =
                    OpenAiCompatibleClient::new(config).context("failed to build LLM client")?;
                Ok(Arc::new(LlmCardSource::new(client)))
            }
            SourceKind::Csv => {
                let dir = self
                    .csv_dir
                    .clone()
                    .context("CSV_QUESTIONS_DIR is required when QUESTION_SOURCE=csv")?;
                let delimiter = parse_delimiter(&self.csv_delimiter)?;
                let cards = load_cards_from_csv_dir(&dir, delimiter)
                    .with_context(|| format!("failed to load cards from {}", dir.display()))?;
                info!("loaded {} cards from {}", cards.len(), dir.display());
                let deck = CsvDeck::new(cards, self.csv_mode.into(), None);
                Ok(Arc::new(CsvCardSource::new(deck)))
            }
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let source = self.source.build()?;
        let pool = CardPool::new(source, PoolConfig::from(&self.pool))
            .context("invalid pool configuration")?;
        let pool = Arc::new(pool);
        pool.start();

        let result = match self.command {
            Command::Play => terminal::run(&pool).await,
            Command::Serve(args) => web::serve(Arc::clone(&pool), &args).await,
        };

        pool.shutdown().await;
        result
    }
}
