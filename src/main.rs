//! Quiz live backend entrypoint wiring the connection gate, WebSocket router and session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_live_back::{
    config::AppConfig,
    dao::session_store::MemorySessionStore,
    routes,
    services::gate::JwtVerifier,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let Some(secret) = config.jwt_secret() else {
        bail!(
            "no bearer token secret configured: set QUIZ_LIVE_JWT_SECRET or `jwt_secret` in the config file"
        );
    };
    let verifier = Arc::new(JwtVerifier::new(secret));
    let app_state = AppState::new(config, verifier);

    match env::var("MONGO_URI").ok().filter(|uri| !uri.is_empty()) {
        Some(uri) => spawn_store_supervisor(app_state.clone(), uri, env::var("MONGO_DB").ok())?,
        None => {
            warn!("MONGO_URI not set; sessions are kept in memory and lost on restart");
            app_state
                .set_session_store(Arc::new(MemorySessionStore::new()))
                .await;
        }
    }

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Connect MongoDB in the background; the server stays degraded until it is reachable.
#[cfg(feature = "mongo-store")]
fn spawn_store_supervisor(
    state: SharedState,
    uri: String,
    db_name: Option<String>,
) -> anyhow::Result<()> {
    use quiz_live_back::{
        dao::{
            session_store::{
                SessionStore,
                mongodb::{MongoConfig, MongoSessionStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    info!(db = db_name.as_deref().unwrap_or("quiz_live"), "using MongoDB session store");
    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref())
                .await
                .map_err(StorageError::from)?;
            let store = MongoSessionStore::connect(config)
                .await
                .map_err(StorageError::from)?;
            Ok(Arc::new(store) as Arc<dyn SessionStore>)
        }
    }));
    Ok(())
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_store_supervisor(
    _state: SharedState,
    _uri: String,
    _db_name: Option<String>,
) -> anyhow::Result<()> {
    bail!("MONGO_URI is set but this build has no `mongo-store` feature")
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
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

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
