use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together")]
    PartialSupabase,
    #[error("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set outside development")]
    MissingSupabase,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: Url,
    pub service_role_key: String,
    pub table: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CorsPolicy {
    AnyOrigin,
    AllowList(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub supabase: Option<SupabaseConfig>,
    pub cors: CorsPolicy,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: usize,
    pub static_dir: Option<PathBuf>,
    pub sentry_dsn: Option<String>,
    pub development: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // for dev its 'development' and for prod anything else
        let development = get("ENVIRONMENT")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let host: IpAddr = parse_or("HOST", get("HOST"), IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port: u16 = parse_or("PORT", get("PORT"), 3001)?;

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(raw_url), Some(key)) => {
                let url = Url::parse(raw_url.trim()).map_err(|e| ConfigError::Invalid {
                    key: "SUPABASE_URL",
                    value: raw_url.clone(),
                    reason: e.to_string(),
                })?;
                Some(SupabaseConfig {
                    url,
                    service_role_key: key.trim().to_string(),
                    table: get("APPLICATIONS_TABLE").unwrap_or_else(|| "applications".to_string()),
                })
            }
            (None, None) if development => {
                info!("Supabase not configured, applications will be kept in memory");
                None
            }
            (None, None) => return Err(ConfigError::MissingSupabase),
            _ => return Err(ConfigError::PartialSupabase),
        };

        let cors = match get("ALLOWED_ORIGINS") {
            Some(list) => {
                let origins: Vec<String> = list
                    .split(',')
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect();
                if origins.is_empty() {
                    CorsPolicy::AnyOrigin
                } else {
                    CorsPolicy::AllowList(origins)
                }
            }
            None => CorsPolicy::AnyOrigin,
        };

        let window_secs: u64 = parse_or("RATE_LIMIT_WINDOW_SECS", get("RATE_LIMIT_WINDOW_SECS"), 15 * 60)?;
        if window_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_WINDOW_SECS",
                value: "0".to_string(),
                reason: "window must be at least one second".to_string(),
            });
        }
        let rate_limit_max_requests: usize =
            parse_or("RATE_LIMIT_MAX_REQUESTS", get("RATE_LIMIT_MAX_REQUESTS"), 10)?;

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            supabase,
            cors,
            rate_limit_window: Duration::from_secs(window_secs),
            rate_limit_max_requests,
            static_dir: get("STATIC_DIR").map(PathBuf::from),
            sentry_dsn: get("SENTRY_DSN"),
            development,
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
