//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use checkout::VnPayConfig;
use domain::StatusPolicy;

pub const DEFAULT_RESULT_PAGE: &str = "http://localhost:5173/payment-result";
pub const DEFAULT_RETURN_URL: &str = "http://localhost:3000/payments/vnpay/return";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `VNP_TMN_CODE`, `VNP_HASH_SECRET`, `VNP_URL`, `VNP_RETURN_URL`: gateway merchant settings
/// - `PAYMENT_RESULT_URL`: client page the callback redirects to
/// - `PAYMENT_TTL_SECS`, `PAYMENT_GRACE_SECS`: how long a gateway payment may stay pending
/// - `SWEEP_INTERVAL_SECS`: how often expired orders are swept
/// - `STATUS_POLICY`: `permissive` or `strict`
/// - `CATALOG_SEED`: optional JSON file of products upserted at start-up
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub vnpay: VnPayConfig,
    pub payment_result_url: String,
    pub payment_grace: Duration,
    pub sweep_interval: Duration,
    pub status_policy: StatusPolicy,
    pub catalog_seed: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let payment_ttl = match parse_secs(&var, "PAYMENT_TTL_SECS")? {
            Some(ttl) => chrono::Duration::from_std(ttl).map_err(|_| ConfigError::Invalid {
                name: "PAYMENT_TTL_SECS",
                value: ttl.as_secs().to_string(),
            })?,
            None => defaults.vnpay.payment_ttl,
        };

        let mut vnpay = VnPayConfig::new(
            var("VNP_TMN_CODE").unwrap_or_default(),
            var("VNP_HASH_SECRET").unwrap_or_default(),
            var("VNP_RETURN_URL").unwrap_or_else(|| DEFAULT_RETURN_URL.to_string()),
        )
        .with_payment_ttl(payment_ttl);
        if let Some(url) = var("VNP_URL") {
            vnpay = vnpay.with_payment_url(url);
        }

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT")?.unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT") {
                None => LogFormat::Text,
                Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                    "text" | "pretty" => LogFormat::Text,
                    "json" => LogFormat::Json,
                    _ => {
                        return Err(ConfigError::Invalid {
                            name: "LOG_FORMAT",
                            value,
                        });
                    }
                },
            },
            database_url: var("DATABASE_URL"),
            vnpay,
            payment_result_url: var("PAYMENT_RESULT_URL").unwrap_or(defaults.payment_result_url),
            payment_grace: parse_secs(&var, "PAYMENT_GRACE_SECS")?
                .unwrap_or(defaults.payment_grace),
            sweep_interval: parse_secs(&var, "SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.sweep_interval),
            status_policy: parse(&var, "STATUS_POLICY")?.unwrap_or(defaults.status_policy),
            catalog_seed: var("CATALOG_SEED").map(PathBuf::from),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Age after which a pending gateway order is expired by the sweeper.
    pub fn expiry_after(&self) -> chrono::Duration {
        self.vnpay.payment_ttl
            + chrono::Duration::from_std(self.payment_grace).unwrap_or(chrono::Duration::zero())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            vnpay: VnPayConfig::new("", "", DEFAULT_RETURN_URL),
            payment_result_url: DEFAULT_RESULT_PAGE.to_string(),
            payment_grace: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            status_policy: StatusPolicy::Permissive,
            catalog_seed: None,
        }
    }
}

fn parse<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}

fn parse_secs<F>(var: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<u64, F>(var, name)?.map(Duration::from_secs))
}
