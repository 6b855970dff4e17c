use anyhow::Context;
use axum::middleware as axum_middleware;
use dotenv::dotenv;
use skillpath_backend::api::{self, AppState};
use skillpath_backend::config::AppConfig;
use skillpath_backend::gateways::GatewayFactory;
use skillpath_backend::logging::init_tracing;
use skillpath_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use skillpath_backend::services::catalog::StaticCourseCatalog;
use skillpath_backend::services::checkout::CheckoutService;
use skillpath_backend::services::enrollment::EnrollmentStateMachine;
use skillpath_backend::services::receipt::LoggingReceiptEmitter;
use skillpath_backend::services::reconciliation::ReconciliationService;
use skillpath_backend::store::postgres::{PgEnrollmentStore, PgPaymentStore};
use skillpath_backend::store::{init_pool, PoolConfig};
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::info;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting skillpath backend service"
    );

    let pool = init_pool(
        &config.database.url,
        Some(PoolConfig::from_database_config(&config.database)),
    )
    .await
    .context("failed to initialize database pool")?;

    let enrollments = Arc::new(PgEnrollmentStore::new(pool.clone()));
    let payments = Arc::new(PgPaymentStore::new(pool.clone()));
    let catalog = Arc::new(
        StaticCourseCatalog::from_env().context("failed to load course catalog")?,
    );
    let gateways =
        Arc::new(GatewayFactory::from_env().context("failed to initialize payment gateways")?);

    let machine = Arc::new(EnrollmentStateMachine::new(
        enrollments.clone(),
        payments.clone(),
        catalog,
    ));
    let checkout = Arc::new(CheckoutService::new(
        payments.clone(),
        machine.clone(),
        gateways.clone(),
        config.checkout.clone(),
    ));
    let reconciliation = Arc::new(ReconciliationService::new(
        payments,
        machine.clone(),
        gateways.clone(),
        Arc::new(LoggingReceiptEmitter::new()),
        config.checkout.clone(),
    ));

    let state = Arc::new(AppState {
        machine,
        checkout,
        reconciliation,
        gateways,
        pool: Some(pool),
    });

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(axum_middleware::from_fn(request_logging_middleware)),
    );

    let addr = config.server.bind_address();
    info!(address = %addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}
