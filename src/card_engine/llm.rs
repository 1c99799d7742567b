//! LLM-backed card source.
//!
//! [`OpenAiCompatibleClient`] speaks the chat-completions protocol over
//! `reqwest`; [`LlmCardSource`] turns one completion into a batch of card
//! candidates: prompt, parse, party-style filter, repeat suppression.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::card_engine::{
    models::RawCardCandidate,
    parse::parse_cards_payload,
    source::{CardSource, RetryPolicy, SourceError},
    style::check_party_style,
};

/// Upper bound on cards requested in a single completion.
const MAX_CARDS_PER_REQUEST: usize = 8;
/// Rough completion budget one card needs before JSON starts getting truncated.
const TOKENS_PER_CARD: u32 = 220;
/// How many recent questions are remembered for repeat suppression.
const RECENT_QUESTIONS: usize = 2000;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    /// `0` omits `max_tokens` from the request.
    pub max_tokens: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub chat_completions_path: String,
    /// e.g. `json_object`; `None` omits `response_format`.
    pub response_format: Option<String>,
    /// Language the cards should be written in.
    pub language: String,
}

impl LlmConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            temperature: 0.7,
            max_tokens: 256,
            timeout: Duration::from_secs(30),
            max_retries: 5,
            chat_completions_path: "/v1/chat/completions".to_string(),
            response_format: None,
            language: "Polish".to_string(),
        }
    }

    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.chat_completions_path.trim_start_matches('/')
        )
    }

    /// Cards per completion, scaled down when the token budget is small.
    pub fn max_cards_per_request(&self) -> usize {
        ((self.max_tokens / TOKENS_PER_CARD) as usize).clamp(1, MAX_CARDS_PER_REQUEST)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("timeout calling LLM after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error calling LLM: {status}. Body: {body}")]
    Http { status: StatusCode, body: String },

    #[error("transport error calling LLM: {0}")]
    Transport(String),

    #[error("unexpected LLM response format: {0}")]
    UnexpectedResponse(String),
}

impl From<LlmError> for SourceError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(d) => SourceError::Timeout(d),
            LlmError::UnexpectedResponse(msg) => SourceError::Malformed(msg),
            other => SourceError::Upstream(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat-completions client
// ---------------------------------------------------------------------------

/// Anything that can answer a system + user prompt pair with text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    fn config(&self) -> &LlmConfig;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiCompatibleClient {
    config: LlmConfig,
    http: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn request<'a>(&'a self, system: &'a str, user: &'a str, minimal: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            max_tokens: (!minimal && self.config.max_tokens > 0).then_some(self.config.max_tokens),
            response_format: if minimal {
                None
            } else {
                self.config.response_format.as_deref().map(|kind| ResponseFormat { kind })
            },
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<String, LlmError> {
        let url = self.config.chat_completions_url();
        let mut req = self.http.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.config.timeout)
            } else {
                LlmError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("LLM HTTP error: {} - {}", status, body);
            return Err(LlmError::Http { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::UnexpectedResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::UnexpectedResponse("missing choices[0].message.content".into()))
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let full = self.request(system_prompt, user_prompt, false);
        match self.send(&full).await {
            Ok(content) if looks_structured(&content) => Ok(content),
            // Some servers return empty or prose content when given these knobs.
            Ok(_) => {
                debug!("LLM returned unstructured content; retrying without response_format/max_tokens");
                self.send(&self.request(system_prompt, user_prompt, true)).await
            }
            Err(LlmError::Http { status, .. })
                if status == StatusCode::BAD_REQUEST && self.config.response_format.is_some() =>
            {
                warn!("LLM rejected response_format; retrying without it");
                let mut fallback = self.request(system_prompt, user_prompt, false);
                fallback.response_format = None;
                self.send(&fallback).await
            }
            Err(e) => Err(e),
        }
    }

    fn config(&self) -> &LlmConfig {
        &self.config
    }
}

fn looks_structured(content: &str) -> bool {
    !content.trim().is_empty() && (content.contains('{') || content.contains('['))
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn system_prompt(language: &str) -> String {
    format!(
        "You write questions for a party game in the style of Wits & Wagers. \
         This is NOT a school quiz and NOT a math exercise. Questions are light, fun and \
         surprising, taken from everyday life and pop culture, so that players have to \
         guess a number. Avoid a scientific or encyclopaedic tone. Never show calculations \
         or formulas. Write in {language}. Reply with valid JSON only."
    )
}

const STYLE_RULES: &str = "\
Style rules (important):
- It must sound like a party game question, not a textbook.
- Prefer: food and drink (volumes, amounts), sport records, film, TV and music, animals, \
curiosities about the human body, everyday objects, money and prices, games and the internet.
- AVOID: science topics that need formulas (radii, circumferences, speeds in m/s, physical \
units), math puzzles, combinatorics, probability, equations.
- The answer is a single number (integer or decimal) that can be estimated.
- explanation: 1-2 short sentences saying where the number comes from, no calculations, no jargon.

Examples of the right style (do not copy):
- How many minutes does a typical feature film last?
- How many litres is a standard wine bottle?
- How many teeth does an adult human have?
- Roughly how many grams does a chocolate bar weigh?

Pick a topic and estimate the number silently; return only JSON.
";

fn user_prompt(count: usize, language: &str) -> String {
    if count == 1 {
        format!(
            "Generate 1 numeric question card in {language}.\n\
             Return ONE JSON object with keys: question (string), answer (number), explanation (string).\n\
             Do not return a list. Do not add any text outside the JSON. The first character must be '{{'. No markdown.\n\
             If you cannot return JSON, return exactly 3 lines: 'Question: ...', 'Answer: ...', 'Explanation: ...'.\n\n{STYLE_RULES}"
        )
    } else {
        format!(
            "Generate {count} different numeric question cards in {language}.\n\
             Each card is a JSON object with keys: question (string), answer (number), explanation (string).\n\
             Return ONE JSON object of the form {{\"cards\": [ ... ]}} and nothing else. \
             The first character must be '{{'. No markdown.\n\n{STYLE_RULES}"
        )
    }
}

// ---------------------------------------------------------------------------
// Card source
// ---------------------------------------------------------------------------

/// Normalised questions seen recently, oldest evicted first.
#[derive(Default)]
struct RecentQuestions {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl RecentQuestions {
    /// Returns `false` if `question` was already seen.
    fn insert(&mut self, question: &str) -> bool {
        let key = question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if !self.set.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > RECENT_QUESTIONS {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

pub struct LlmCardSource<C: CompletionClient> {
    client: C,
    recent: Mutex<RecentQuestions>,
}

impl<C: CompletionClient> LlmCardSource<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            recent: Mutex::new(RecentQuestions::default()),
        }
    }

    fn keep(&self, candidate: &RawCardCandidate) -> bool {
        if let Err(reason) = check_party_style(candidate) {
            warn!("rejecting LLM card: {reason}: {:?}", candidate.question);
            return false;
        }
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if !recent.insert(&candidate.question) {
            debug!("dropping repeated question: {:?}", candidate.question);
            return false;
        }
        true
    }
}

#[async_trait]
impl<C: CompletionClient> CardSource for LlmCardSource<C> {
    async fn produce_batch(&self, count: usize) -> Result<Vec<RawCardCandidate>, SourceError> {
        let config = self.client.config();
        let requested = count.clamp(1, config.max_cards_per_request());
        let raw = self
            .client
            .complete(&system_prompt(&config.language), &user_prompt(requested, &config.language))
            .await?;

        let candidates = parse_cards_payload(&raw).inspect_err(|_| {
            let snippet: String = raw.replace('\n', " ").chars().take(250).collect();
            warn!("unparsable LLM content ({} bytes): {}", raw.len(), snippet);
        })?;

        Ok(candidates.into_iter().filter(|c| self.keep(c)).collect())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.client.config().max_retries,
            Duration::from_millis(500),
            Duration::from_secs(8),
        )
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
