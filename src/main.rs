//! quizrush-back binary entrypoint wiring the gateway, room engine, and
//! PostgreSQL storage.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizrush_back::{
    auth::JwtSessionVerifier,
    config::{SHUTDOWN_GRACE, ServerConfig},
    dao::postgres::PgQuizStore,
    routes,
    services::cleanup,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env().context("loading configuration")?;

    let store = PgQuizStore::connect(&config.database_url)
        .await
        .context("connecting to storage")?;
    let verifier = Arc::new(JwtSessionVerifier::new(&config.session_secret));

    let port = config.port;
    let state = AppState::new(config, Arc::new(store.clone()), verifier);

    // Background sweep for rate-limit windows and dead rooms.
    tokio::spawn(cleanup::run(state.clone()));

    let app = routes::router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;

    // Graceful shutdown is driven from here rather than by the signal
    // directly: serve() cannot finish while upgraded sockets are open, so
    // the going-away closes must go out before its future is awaited to
    // completion.
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            // The listener failed before any termination signal.
            return result.context("serving axum");
        }
        _ = shutdown_signal() => {}
    }

    // Stop accepting handshakes, push going-away closes, and cancel room
    // timers, then let connections and the pool drain within the bounded
    // grace.
    info!("draining before shutdown");
    let _ = shutdown_tx.send(());
    state.begin_shutdown();

    let drain = async {
        if let Err(err) = (&mut server).await {
            warn!(error = %err, "server error while draining");
        }
        store.close().await;
    };
    if timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("shutdown grace elapsed before the drain completed");
    }

    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
