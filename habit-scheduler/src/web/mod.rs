use axum::Router;
use axum::http::Method;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::engine::ReconciliationEngine;
use crate::remote::HabiticaClient;
use crate::scheduler::Scheduler;
use crate::store::{PersistenceGateway, SqliteStore};
use crate::task::TaskService;
use crate::task::api::v1::{TaskState, create_api_router};

/// Builds the full application router: health check plus the versioned task API.
pub fn create_app(task_state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check_handler))
        .nest("/v1", create_api_router(task_state))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_headers(Any)
                    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]),
            ),
        )
}

/// Wires the store, remote client, scheduler and web server together and runs until Ctrl-C.
///
/// Failing to open the store or to load the stored snapshot aborts startup. On shutdown the
/// trigger loops are stopped and the registry is saved one last time.
#[tracing::instrument(skip(settings))]
pub async fn start(settings: Settings) -> anyhow::Result<()> {
    let store = SqliteStore::open(&settings.store_path)?;
    let persistence = PersistenceGateway::new(Arc::new(store), settings.store_key.clone());
    let registry = persistence.load().await?.into_shared();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let remote = HabiticaClient::new(settings.habitica.clone())?;
    let engine = ReconciliationEngine::new(Arc::clone(&registry), Arc::new(remote), clock.clone())
        .with_vanish_threshold(settings.vanish_threshold);
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry),
        Arc::new(engine),
        persistence.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let trigger_handles = scheduler.spawn(settings.triggers.clone(), &shutdown_tx);

    let task_state = Arc::new(TaskState {
        service: TaskService::new(Arc::clone(&registry), clock),
        persistence: persistence.clone(),
    });
    let app = create_app(task_state);

    let listener = tokio::net::TcpListener::bind(&settings.listen_address).await?;
    tracing::info!("Web server running on http://{}", settings.listen_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    for handle in trigger_handles {
        if let Err(e) = handle.await {
            tracing::warn!("Trigger loop ended abnormally: {}", e);
        }
    }

    let count = persistence.save(&registry).await?;
    tracing::info!("Saved {} tasks before exit", count);
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down..."),
        Err(e) => {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}
