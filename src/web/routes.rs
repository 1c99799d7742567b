use axum::{routing::{get, post}, Router};
use super::handler::{answer, api_card, api_stats, health, index, next, shutdown, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/",          get(index))
        .route("/next",      post(next))
        .route("/answer",    post(answer))
        .route("/shutdown",  post(shutdown))
        .route("/api/card",  get(api_card))
        .route("/api/stats", get(api_stats))
        .route("/health",    get(health))
        .with_state(state)
}
