use std::{env, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use ofl_common::{parse_boolean_flag, Amount};
use order_ledger_engine::reconciliation::ReconciliationConfig;
use yookassa_tools::YookassaConfig;

const DEFAULT_OFL_HOST: &str = "127.0.0.1";
const DEFAULT_OFL_PORT: u16 = 8420;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EXPIRATION_MINUTES: i64 = 30;
const DEFAULT_LOOKBACK_MARGIN_MINUTES: i64 = 5;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address.
    pub use_forwarded: bool,
    /// Orders below this total cannot advance through the fulfilment steps.
    pub min_order_amount: Amount,
    /// Cooperative deadline applied to request-path ledger mutations.
    pub request_timeout: StdDuration,
    /// Expiration window and lookback margin for the reconciliation job.
    pub reconciliation: ReconciliationConfig,
    /// Where finished fanout patches are POSTed. When unset, patches are
    /// only logged.
    pub fanout_url: Option<String>,
    pub yookassa: YookassaConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OFL_HOST.to_string(),
            port: DEFAULT_OFL_PORT,
            database_url: String::default(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            min_order_amount: Amount::ZERO,
            request_timeout: StdDuration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reconciliation: ReconciliationConfig::default(),
            fanout_url: None,
            yookassa: YookassaConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("OFL_HOST").ok().unwrap_or_else(|| DEFAULT_OFL_HOST.into());
        let port = env::var("OFL_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid port for OFL_PORT. {e} Using the default, {DEFAULT_OFL_PORT}, instead.");
                    DEFAULT_OFL_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_OFL_PORT);
        let database_url = env::var("OFL_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ OFL_DATABASE_URL is not set. Please set it to the URL for the ledger database.");
            String::default()
        });
        let use_x_forwarded_for = parse_boolean_flag(env::var("OFL_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("OFL_USE_FORWARDED").ok(), false);
        let min_order_amount = env::var("OFL_MIN_ORDER_AMOUNT")
            .ok()
            .and_then(|s| {
                s.parse::<Amount>()
                    .map_err(|e| warn!("🪛️ Invalid configuration value for OFL_MIN_ORDER_AMOUNT. {e}"))
                    .ok()
            })
            .unwrap_or(Amount::ZERO);
        let request_timeout = env::var("OFL_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| {
                s.parse::<u64>()
                    .map_err(|e| warn!("🪛️ Invalid configuration value for OFL_REQUEST_TIMEOUT_SECS. {e}"))
                    .ok()
            })
            .map(StdDuration::from_secs)
            .unwrap_or(StdDuration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
        let reconciliation = configure_reconciliation();
        let fanout_url = env::var("OFL_FANOUT_URL").ok().filter(|s| !s.is_empty());
        let yookassa = YookassaConfig::new_from_env_or_default();
        Self {
            host,
            port,
            database_url,
            use_x_forwarded_for,
            use_forwarded,
            min_order_amount,
            request_timeout,
            reconciliation,
            fanout_url,
            yookassa,
        }
    }
}

fn configure_reconciliation() -> ReconciliationConfig {
    let expiration_window = env::var("OFL_TX_EXPIRATION_MINUTES")
        .map_err(|_| {
            info!(
                "🪛️ OFL_TX_EXPIRATION_MINUTES is not set. Using the default value of {DEFAULT_EXPIRATION_MINUTES} \
                 minutes."
            )
        })
        .and_then(|s| {
            s.parse::<i64>()
                .map(Duration::minutes)
                .map_err(|e| warn!("🪛️ Invalid configuration value for OFL_TX_EXPIRATION_MINUTES. {e}"))
        })
        .ok()
        .unwrap_or(Duration::minutes(DEFAULT_EXPIRATION_MINUTES));
    let lookback_margin = env::var("OFL_LOOKBACK_MARGIN_MINUTES")
        .map_err(|_| {
            info!(
                "🪛️ OFL_LOOKBACK_MARGIN_MINUTES is not set. Using the default value of \
                 {DEFAULT_LOOKBACK_MARGIN_MINUTES} minutes."
            )
        })
        .and_then(|s| {
            s.parse::<i64>()
                .map(Duration::minutes)
                .map_err(|e| warn!("🪛️ Invalid configuration value for OFL_LOOKBACK_MARGIN_MINUTES. {e}"))
        })
        .ok()
        .unwrap_or(Duration::minutes(DEFAULT_LOOKBACK_MARGIN_MINUTES));
    ReconciliationConfig { expiration_window, lookback_margin }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// The subset of the configuration the request handlers need. Kept small and
/// free of secrets so it can be copied into every worker.
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
    pub request_timeout: StdDuration,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            use_x_forwarded_for: config.use_x_forwarded_for,
            use_forwarded: config.use_forwarded,
            request_timeout: config.request_timeout,
        }
    }
}
