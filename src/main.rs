use std::net::SocketAddr;
use std::sync::Arc;

use stk_payments_backend::api::app_router;
use stk_payments_backend::config::{skip_externals, AppConfig};
use stk_payments_backend::database::{
    init_pool_from_config, memory::InMemoryPaymentStore,
    payment_repository::PgPaymentRepository, repository::PaymentStore, run_migrations,
};
use stk_payments_backend::logging::init_tracing;
use stk_payments_backend::payments::providers::MpesaProvider;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
    let skip_externals = skip_externals();
    let config = AppConfig::from_env(skip_externals)?;
    init_tracing(&config.logging);

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return Err(e.into());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mpesa_environment = ?config.mpesa.environment,
        mpesa_base_url = %config.mpesa.base_url,
        "Starting STK payments service"
    );

    let store: Arc<dyn PaymentStore> = match &config.database {
        Some(database) => {
            info!("Initializing database connection pool");
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!(error = %e, "Failed to initialize database pool");
                e
            })?;
            run_migrations(&pool).await?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            Arc::new(PgPaymentRepository::new(pool))
        }
        None => {
            warn!("SKIP_EXTERNALS=true, payments are kept in memory and lost on restart");
            Arc::new(InMemoryPaymentStore::new())
        }
    };

    let mpesa = Arc::new(config.mpesa.clone());
    let provider = Arc::new(MpesaProvider::new(mpesa.clone())?);

    let app = app_router(provider, store, mpesa);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind");
        e
    })?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}
