use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub public_base_url: String,
    pub currency: String,
    pub checkout_provider: String,
    pub payout_provider: String,
    pub flutterwave_secret_key: String,
    pub flutterwave_webhook_hash: String,
    pub intasend_secret_key: String,
    pub intasend_webhook_challenge: String,
    pub payout_max_attempts: u32,
    pub payout_base_delay_ms: u64,
    pub provider_timeout_secs: u64,
    pub verify_timeout_secs: u64,
    pub platform_fee_percent: i64,
    /// Run a settled payment's payout on its own task instead of inside the
    /// webhook request.
    pub payout_in_background: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "bookwise.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "KES".to_string()),
            checkout_provider: env::var("CHECKOUT_PROVIDER")
                .unwrap_or_else(|_| "intasend".to_string()),
            payout_provider: env::var("PAYOUT_PROVIDER").unwrap_or_else(|_| "intasend".to_string()),
            flutterwave_secret_key: env::var("FLUTTERWAVE_SECRET_KEY").unwrap_or_default(),
            flutterwave_webhook_hash: env::var("FLUTTERWAVE_WEBHOOK_HASH").unwrap_or_default(),
            intasend_secret_key: env::var("INTASEND_SECRET_KEY").unwrap_or_default(),
            intasend_webhook_challenge: env::var("INTASEND_WEBHOOK_CHALLENGE").unwrap_or_default(),
            payout_max_attempts: env::var("PAYOUT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            payout_base_delay_ms: env::var("PAYOUT_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            provider_timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            verify_timeout_secs: env::var("VERIFY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            platform_fee_percent: env::var("PLATFORM_FEE_PERCENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            payout_in_background: env::var("PAYOUT_IN_BACKGROUND")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }
}
