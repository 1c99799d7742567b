use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, Redirect},
    Json,
};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::info;

use number_cards::{CardPool, SourceHealth};

use crate::session::{exhausted_message, wait_budget, Reveal, Session};

const EMPTY_POOL_WAIT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Shared state: the pool plus the single browser session
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct WebSession {
    session: Session,
    /// Shown once on the next page render.
    notice: Option<&'static str>,
}

#[derive(Clone)]
pub struct AppState {
    pool: Arc<CardPool>,
    session: Arc<Mutex<WebSession>>,
    allow_shutdown: bool,
    stop: Arc<Notify>,
}

impl AppState {
    pub fn new(pool: Arc<CardPool>, allow_shutdown: bool) -> Self {
        Self {
            pool,
            session: Arc::new(Mutex::new(WebSession::default())),
            allow_shutdown,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Notified once when `POST /shutdown` is accepted.
    pub fn shutdown_trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.stop)
    }

    fn session(&self) -> std::sync::MutexGuard<'_, WebSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// HTML pages
// ---------------------------------------------------------------------------

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let buffered = state.pool.len();
    let health = state.pool.health();
    let mut web = state.session();
    let notice = web.notice.take();
    Html(render_page(&web.session, notice, buffered, &health))
}

pub async fn next(State(state): State<AppState>) -> Redirect {
    let wait = wait_budget(&state.pool, EMPTY_POOL_WAIT);
    let drawn = state.pool.take_one(wait).await;

    let mut web = state.session();
    match drawn {
        Ok(card) => web.session.show(card),
        Err(e) => {
            tracing::debug!("web draw failed: {e}");
            web.notice = Some(exhausted_message(&e));
        }
    }
    Redirect::to("/")
}

pub async fn answer(State(state): State<AppState>) -> Redirect {
    let mut web = state.session();
    if let Reveal::NoCard = web.session.reveal() {
        web.notice = Some("Draw a card first.");
    }
    Redirect::to("/")
}

// ---------------------------------------------------------------------------
// POST /shutdown (only with WEB_ALLOW_SHUTDOWN)
// ---------------------------------------------------------------------------

pub async fn shutdown(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if !state.allow_shutdown {
        return (StatusCode::FORBIDDEN, "shutdown is disabled");
    }
    info!("stopping card pool for HTTP shutdown");
    state.pool.shutdown().await;
    state.stop.notify_one();
    (StatusCode::OK, "shutting down")
}

// ---------------------------------------------------------------------------
// JSON API
// ---------------------------------------------------------------------------

pub async fn api_card(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let wait = wait_budget(&state.pool, EMPTY_POOL_WAIT);
    match state.pool.take_one(wait).await {
        Ok(card) => Ok(Json(json!({
            "question": card.question,
            "answer": card.answer,
            "answer_display": card.answer_display(),
            "explanation": card.explanation,
        }))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": exhausted_message(&e),
                "source_unavailable": e.source_unavailable,
                "waited_ms": e.waited.as_millis() as u64,
            })),
        )),
    }
}

pub async fn api_stats(State(state): State<AppState>) -> Json<Value> {
    let pool = &state.pool;
    Json(json!({
        "buffered": pool.len(),
        "in_flight": pool.in_flight(),
        "target_size": pool.config().target_size,
        "refill_threshold": pool.config().refill_threshold,
        "health": pool.health(),
        "stats": pool.stats(),
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = if state.pool.health().is_available() { "ok" } else { "degraded" };
    Json(json!({ "status": status }))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_page(
    session: &Session,
    notice: Option<&str>,
    buffered: usize,
    health: &SourceHealth,
) -> String {
    let mut body = String::new();

    if let Some(notice) = notice {
        body.push_str(&format!("<p class=\"notice\">{}</p>\n", escape_html(notice)));
    }

    match session.current() {
        Some(card) => {
            body.push_str(&format!(
                "<h2>Card #{}</h2>\n<p class=\"question\">{}</p>\n",
                session.shown(),
                escape_html(&card.question)
            ));
            if session.is_revealed() {
                body.push_str(&format!(
                    "<p class=\"answer\">Answer: <strong>{}</strong></p>\n<p class=\"explanation\">{}</p>\n",
                    escape_html(&card.answer_display()),
                    escape_html(&card.explanation)
                ));
            } else {
                body.push_str(
                    "<form method=\"post\" action=\"/answer\"><button>Show answer</button></form>\n",
                );
            }
        }
        None => body.push_str("<p>Press <em>Next card</em> to start.</p>\n"),
    }

    body.push_str("<form method=\"post\" action=\"/next\"><button>Next card</button></form>\n");

    let status = match health {
        SourceHealth::Available => format!("{buffered} card(s) ready"),
        SourceHealth::Unavailable { reason } => {
            format!("{buffered} card(s) left, source unavailable: {}", escape_html(reason))
        }
    };
    body.push_str(&format!("<footer>{status}</footer>\n"));

    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Number cards</title></head>\n<body>\n<h1>Number cards</h1>\n{body}</body>\n</html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{http::header::LOCATION, response::IntoResponse};
    use number_cards::{
        Card, CardSource, CsvCardSource, CsvDeck, DeckMode, PoolConfig, RawCardCandidate,
        SourceError,
    };

    /// Never delivers: the pool stays empty but healthy.
    struct Stalled;

    #[async_trait]
    impl CardSource for Stalled {
        async fn produce_batch(&self, _count: usize) -> Result<Vec<RawCardCandidate>, SourceError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    fn started_pool(source: Arc<dyn CardSource>) -> Arc<CardPool> {
        let config = PoolConfig { target_size: 3, refill_threshold: 1, ..PoolConfig::default() };
        let pool = Arc::new(CardPool::new(source, config).unwrap());
        pool.start();
        pool
    }

    /// A pool over a one-card deck that has already run out of source.
    async fn drained_pool() -> Arc<CardPool> {
        let card = Card {
            question: "Ile nóg ma pająk?".into(),
            answer: 8.0,
            explanation: "Pajęczaki mają osiem odnóży.".into(),
        };
        let deck = CsvDeck::new(vec![card], DeckMode::Once, Some(1));
        let pool = started_pool(Arc::new(CsvCardSource::new(deck)));
        for _ in 0..1000 {
            if !pool.health().is_available() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!pool.health().is_available());
        pool
    }

    #[tokio::test(start_paused = true)]
    async fn api_card_serves_then_reports_unavailable_source() {
        let state = AppState::new(drained_pool().await, false);

        let Json(card) = api_card(State(state.clone())).await.expect("the only card");
        assert_eq!(card["question"], "Ile nóg ma pająk?");
        assert_eq!(card["answer_display"], "8");

        let (status, Json(body)) = api_card(State(state)).await.unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["source_unavailable"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn health_degrades_after_permanent_source_error() {
        let Json(ok) = health(State(AppState::new(started_pool(Arc::new(Stalled)), false))).await;
        assert_eq!(ok["status"], "ok");

        let Json(degraded) = health(State(AppState::new(drained_pool().await, false))).await;
        assert_eq!(degraded["status"], "degraded");
    }

    #[tokio::test(start_paused = true)]
    async fn next_on_refilling_pool_sets_notice_and_redirects() {
        let state = AppState::new(started_pool(Arc::new(Stalled)), false);

        let response = next(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/");

        let Html(page) = index(State(state.clone())).await;
        assert!(page.contains("refilling"));
        // The notice is shown once.
        let Html(page) = index(State(state)).await;
        assert!(!page.contains("refilling"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_forbidden_unless_enabled() {
        let state = AppState::new(started_pool(Arc::new(Stalled)), false);
        let trigger = state.shutdown_trigger();

        let (status, _) = shutdown(State(state)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(tokio::time::timeout(Duration::from_secs(1), trigger.notified()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_shutdown_stops_pool_and_signals_server() {
        let pool = started_pool(Arc::new(Stalled));
        let state = AppState::new(Arc::clone(&pool), true);
        let trigger = state.shutdown_trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.in_flight(), 1);

        let (status, _) = shutdown(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pool.in_flight(), 0);
        tokio::time::timeout(Duration::from_secs(1), trigger.notified())
            .await
            .expect("server asked to stop");
    }

    #[test]
    fn escape_html_neutralises_markup() {
        assert_eq!(
            escape_html("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn page_hides_answer_until_revealed() {
        let mut session = Session::default();
        session.show(Card {
            question: "How many <legs> does a spider have?".into(),
            answer: 8.0,
            explanation: "Arachnids have 8 legs.".into(),
        });

        let page = render_page(&session, None, 3, &SourceHealth::Available);
        assert!(page.contains("How many &lt;legs&gt; does a spider have?"));
        assert!(!page.contains("Arachnids"));
        assert!(page.contains("action=\"/answer\""));
        assert!(page.contains("3 card(s) ready"));

        session.reveal();
        let page = render_page(&session, Some("hi"), 0, &SourceHealth::Available);
        assert!(page.contains("<strong>8</strong>"));
        assert!(page.contains("Arachnids have 8 legs."));
        assert!(page.contains("class=\"notice\">hi"));
    }

    #[test]
    fn page_reports_unavailable_source() {
        let health = SourceHealth::Unavailable { reason: "deck <empty>".into() };
        let page = render_page(&Session::default(), None, 0, &health);
        assert!(page.contains("source unavailable: deck &lt;empty&gt;"));
        assert!(page.contains("Next card"));
    }
}
