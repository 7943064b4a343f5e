use std::time::Duration;

/// Runtime configuration, read once at startup. Chain-related fields are
/// optional on purpose: a missing RPC url or contract address puts the
/// service in store-only mode instead of failing to boot.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub rpc_url: Option<String>,
    pub core_address: Option<String>,
    pub operator_key: Option<String>,
    pub network: String,
    pub default_apr: f64,
    pub default_lock_days: f64,
    pub admin_email: Option<String>,
    pub jwt_secret: String,
    pub sync_interval: Duration,
    pub chain_call_timeout: Duration,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            port: env_opt("PORT").and_then(|v| v.parse().ok()).unwrap_or(4000),
            database_url: env_opt("DATABASE_URL").unwrap_or_else(|| "sqlite:greenfi.db".into()),
            rpc_url: env_opt("GREENFI_RPC_URL"),
            core_address: env_opt("GREENFI_CORE_ADDRESS"),
            operator_key: env_opt("GREENFI_OPERATOR_KEY"),
            network: env_opt("GREENFI_NETWORK").unwrap_or_else(|| "hedera-testnet".into()),
            default_apr: env_opt("STAKE_APR").and_then(|v| v.parse().ok()).unwrap_or(12.0),
            default_lock_days: env_opt("STAKE_LOCK_DAYS").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            admin_email: env_opt("ADMIN_EMAIL").map(|v| v.to_lowercase()),
            jwt_secret: env_opt("JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into()),
            sync_interval: Duration::from_secs(
                env_opt("SYNC_INTERVAL_SECS").and_then(|v| v.parse().ok()).unwrap_or(15),
            ),
            chain_call_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 4000,
            database_url: "sqlite::memory:".into(),
            rpc_url: None,
            core_address: None,
            operator_key: None,
            network: "hedera-testnet".into(),
            default_apr: 12.0,
            default_lock_days: 0.0,
            admin_email: None,
            jwt_secret: "dev-secret-change-me".into(),
            sync_interval: Duration::from_secs(15),
            chain_call_timeout: Duration::from_secs(5),
        }
    }
}
