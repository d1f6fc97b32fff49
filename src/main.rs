use std::sync::{Arc, Mutex};

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use bookwise::config::AppConfig;
use bookwise::db;
use bookwise::handlers;
use bookwise::services::providers::flutterwave::FlutterwaveProvider;
use bookwise::services::providers::intasend::IntasendProvider;
use bookwise::services::providers::{ProviderKind, ProviderRegistry};
use bookwise::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let checkout = ProviderKind::parse(&config.checkout_provider)
        .ok_or_else(|| anyhow::anyhow!("unknown CHECKOUT_PROVIDER: {}", config.checkout_provider))?;
    let payout = ProviderKind::parse(&config.payout_provider)
        .ok_or_else(|| anyhow::anyhow!("unknown PAYOUT_PROVIDER: {}", config.payout_provider))?;

    if config.flutterwave_webhook_hash.is_empty() {
        tracing::warn!("FLUTTERWAVE_WEBHOOK_HASH is empty, Flutterwave webhooks will be rejected");
    }
    if config.intasend_webhook_challenge.is_empty() {
        tracing::warn!("INTASEND_WEBHOOK_CHALLENGE is empty, IntaSend webhooks will be rejected");
    }
    if config.admin_token == "changeme" {
        tracing::warn!("ADMIN_TOKEN is the default, set it before exposing the admin API");
    }

    let providers = ProviderRegistry::new(checkout, payout)
        .with(Arc::new(FlutterwaveProvider::new(
            config.flutterwave_secret_key.clone(),
            config.flutterwave_webhook_hash.clone(),
            config.provider_timeout_secs,
        )))
        .with(Arc::new(IntasendProvider::new(
            config.intasend_secret_key.clone(),
            config.intasend_webhook_challenge.clone(),
            config.provider_timeout_secs,
        )));
    tracing::info!(
        checkout = checkout.as_str(),
        payout = payout.as_str(),
        "payment providers configured"
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        providers,
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
