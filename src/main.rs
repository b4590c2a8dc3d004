use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::info;

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::init_schema(&db)
            .await
            .context("failed to initialize database schema")?;
    }
    let db = Arc::new(db);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // External collaborators
    let payment_gateway: Arc<dyn api::services::payments::PaymentGateway> = Arc::new(
        api::services::payments::HttpPaymentGateway::new(&cfg.payment_gateway)?,
    );
    let catalog: Arc<dyn api::services::catalog::CatalogGateway> =
        Arc::new(api::services::catalog::SeaOrmCatalog::new(db.clone()));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db.clone(),
        catalog,
        payment_gateway,
        Arc::new(event_sender.clone()),
        cfg.payment_gateway.currency.clone(),
    );

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    };
    let app = api::app_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    info!(%addr, environment = %cfg.environment, "starting storefront API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
