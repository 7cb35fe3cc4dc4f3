use std::{net::SocketAddr, sync::Arc};

use tokio::{signal, sync::mpsc};
use tracing::{error, info};

use storefront_checkout as app;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = app::config::load_config()?;
    app::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = app::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = Arc::new(app::events::EventSender::new(event_tx));
    tokio::spawn(app::events::process_events(event_rx));

    let rate_provider = app::services::shipping::build_rate_provider(&cfg.shipping)?;
    info!(
        url = %cfg.shipping.rate_service_url,
        fallback = %cfg.shipping.fallback_rate,
        conversion = cfg.shipping.exchange_rate_url.is_some(),
        "Shipping rate provider configured"
    );

    let services = app::handlers::AppServices::new(db_arc.clone(), event_sender, &cfg, rate_provider);
    let auth = Arc::new(app::auth::AuthService::new(cfg.jwt_secret.clone()));

    let state = app::AppState {
        db: db_arc,
        config: cfg.clone(),
        auth,
        services,
    };

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!(
        environment = %cfg.environment,
        production = cfg.is_production(),
        "storefront-checkout listening on http://{}",
        addr
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app::app_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
