//! Song sheet sync binary entrypoint wiring REST, WebSocket and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songsheet_sync::{
    config::AppConfig,
    dao::session_store::memory::MemorySessionStore,
    routes,
    state::{AppState, SharedState},
};

const STORAGE_BACKEND_ENV: &str = "STORAGE_BACKEND";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(AppConfig::load());
    start_storage(app_state.clone()).await?;

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

/// Install the in-memory store directly, or hand the configured database to the storage supervisor.
async fn start_storage(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var(STORAGE_BACKEND_ENV).unwrap_or_else(|_| "memory".into());

    match backend.trim().to_ascii_lowercase().as_str() {
        "memory" => {
            info!("using in-memory session storage; state is lost on restart");
            state
                .storage()
                .install(Arc::new(MemorySessionStore::new()))
                .await;
            state.sessions().rearm_pending_alarms().await;
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use songsheet_sync::dao::{
                session_store::{
                    SessionStore,
                    mongodb::{MongoConfig, MongoSessionStore},
                },
                storage::StorageError,
            };
            use songsheet_sync::services::storage_supervisor;

            info!("using MongoDB session storage");
            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoSessionStore::connect(config).await?;
                Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use songsheet_sync::dao::{
                session_store::{
                    SessionStore,
                    couchdb::{CouchConfig, CouchSessionStore},
                },
                storage::StorageError,
            };
            use songsheet_sync::services::storage_supervisor;

            info!("using CouchDB session storage");
            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env()?;
                let store = CouchSessionStore::connect(config).await?;
                Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
            }));
        }
        other => bail!("unsupported {STORAGE_BACKEND_ENV} `{other}`"),
    }

    Ok(())
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
                tracing::warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
