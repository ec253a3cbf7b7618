use axum::{
    routing::{get, post},
    Router,
};
use propdesk::application::handlers::{challenges, health, prices, trading};
use propdesk::application::{AppState, SharedState};
use propdesk::config::AppConfig;
use propdesk::domain::services::market_time::{local_day, local_hour};
use propdesk::infrastructure::broker::BrokerClient;
use propdesk::infrastructure::instrument_cache::InstrumentCache;
use propdesk::infrastructure::price_bridge::PriceBridge;
use propdesk::persistence::init_database;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "propdesk=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!("Starting propdesk evaluation server");
    if !config.broker.is_configured() {
        warn!("Broker credentials not configured; serving fallback quotes only");
    }

    let pool = init_database(&config.database_url).await?;

    let broker = Arc::new(BrokerClient::new(config.broker.clone(), pool.clone()));
    let cache = InstrumentCache::new(config.instrument_cache_capacity, config.instrument_cache_ttl);
    let quotes = Arc::new(PriceBridge::new(broker, cache));

    let state: SharedState = Arc::new(AppState::new(pool, config.clone(), quotes));

    if let Some(hour) = config.square_off_hour {
        tokio::spawn(square_off_task(
            state.clone(),
            hour,
            config.exchange_offset_minutes,
        ));
    }

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/trading/execute", post(trading::execute_trade))
        .route("/trading/square-off", post(trading::square_off))
        .route("/trading/auto-square-off", post(trading::auto_square_off))
        .route(
            "/challenges/evaluate",
            post(challenges::evaluate).get(challenges::evaluate_preview),
        )
        .route("/challenges/status/:id", get(challenges::status))
        .route("/prices/:scrip", get(prices::get_price))
        .route("/prices/stream/:scrip", get(prices::stream_price))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

/// Once per exchange-local day, after the configured hour, sweep every open
/// trade closed. Checked every minute; a restart after the hour still runs
/// the sweep for that day.
async fn square_off_task(state: SharedState, hour: u32, offset_minutes: i32) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
    let mut last_run = None;
    loop {
        interval.tick().await;
        let now = chrono::Utc::now();
        let today = local_day(now, offset_minutes);
        if local_hour(now, offset_minutes) < hour || last_run == Some(today) {
            continue;
        }
        match state.trading.auto_square_off(None).await {
            Ok(outcome) => {
                info!(
                    closed = outcome.closed_trades.len(),
                    "scheduled auto square-off completed"
                );
                last_run = Some(today);
            }
            Err(e) => error!("Scheduled auto square-off failed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
