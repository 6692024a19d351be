use std::net::IpAddr;

use log::*;
use ofl_common::Secret;

const DEFAULT_API_BASE: &str = "https://api.yookassa.ru/v3";

#[derive(Debug, Clone, Default)]
pub struct YookassaConfig {
    /// The numeric shop id issued by YooKassa.
    pub shop_id: String,
    pub secret_key: Secret<String>,
    pub api_base: String,
    /// Webhook deliveries are only accepted from these addresses. `None`
    /// disables the check (with a warning); an empty list rejects everything.
    pub webhook_allowlist: Option<Vec<IpAddr>>,
}

impl YookassaConfig {
    pub fn new_from_env_or_default() -> Self {
        let shop_id = std::env::var("OFL_YOOKASSA_SHOP_ID").unwrap_or_else(|_| {
            warn!("OFL_YOOKASSA_SHOP_ID not set, using a placeholder shop id");
            "000000".to_string()
        });
        let secret_key = Secret::new(std::env::var("OFL_YOOKASSA_SECRET_KEY").unwrap_or_else(|_| {
            warn!("OFL_YOOKASSA_SECRET_KEY not set, using a placeholder key");
            "test_00000000000000".to_string()
        }));
        let api_base = std::env::var("OFL_YOOKASSA_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let webhook_allowlist = std::env::var("OFL_YOOKASSA_IP_ALLOWLIST").ok().and_then(|s| {
            if ["none", "false", "0"].contains(&s.to_lowercase().as_str()) {
                info!(
                    "Webhook IP allowlist for YooKassa is disabled. Set OFL_YOOKASSA_IP_ALLOWLIST to a \
                     comma-separated list of addresses to enable it."
                );
                return None;
            }
            let addrs = s
                .split(',')
                .filter_map(|s| {
                    s.trim()
                        .parse()
                        .map_err(|e| {
                            warn!("Ignoring invalid IP address ({s}) in OFL_YOOKASSA_IP_ALLOWLIST: {e}");
                            None::<IpAddr>
                        })
                        .ok()
                })
                .collect::<Vec<IpAddr>>();
            Some(addrs)
        });
        match &webhook_allowlist {
            Some(list) if list.is_empty() => {
                warn!(
                    "🚨️ The YooKassa webhook allowlist was configured but is empty. No webhook delivery will be \
                     accepted."
                );
            },
            None => {
                info!("No YooKassa webhook IP allowlist is set. Webhook source verification is disabled.");
            },
            Some(list) => {
                let addrs = list.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                info!("YooKassa webhook allowlist: {addrs}");
            },
        }
        Self { shop_id, secret_key, api_base, webhook_allowlist }
    }
}
