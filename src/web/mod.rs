//! Browser front end: one shared game session over HTTP, plus a small JSON API.

mod handler;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{error, info};

use number_cards::CardPool;

use crate::cli::ServeArgs;

pub async fn serve(pool: Arc<CardPool>, args: &ServeArgs) -> Result<()> {
    let state = handler::AppState::new(pool, args.allow_shutdown);
    let stop = state.shutdown_trigger();
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    let addr: SocketAddr = listener.local_addr().context("listener has no local address")?;
    info!("serving number cards on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(stop))
        .await
        .context("web server stopped with an error")?;
    Ok(())
}

/// Resolves on Ctrl-C or once `POST /shutdown` has been accepted.
async fn shutdown_signal(stop: Arc<Notify>) {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => {
                error!("cannot listen for Ctrl-C, serving until stopped over HTTP: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = stop.notified() => info!("shutdown requested over HTTP"),
    }
}
