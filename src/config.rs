use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::seed::geocode::GeocodeSettings;
use crate::seed::ingest::IngestLimits;
use crate::seed::insert::DEFAULT_BATCH_SIZE;
use crate::seed::rest_sink::RestSettings;
use crate::seed::PipelineSettings;

/// Application-level constants
pub const APP_NAME: &str = "bizseed";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix shared by every environment variable the server reads.
pub const ENV_PREFIX: &str = "BIZSEED_";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
pub const DEFAULT_MAX_SESSIONS: usize = 32;
pub const DEFAULT_RATE_PER_MINUTE: u32 = 120;
pub const DEFAULT_REST_TABLE: &str = "businesses";

/// Get the application data directory (`<data dir>/bizseed`).
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn default_db_path() -> PathBuf {
    app_data_dir().join("bizseed.db")
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "bizseed=info,tower_http=info"
}

// ═══════════════════════════════════════════════════════════
// Runtime configuration
// ═══════════════════════════════════════════════════════════

/// Where listings are written.
#[derive(Debug, Clone)]
pub enum SinkConfig {
    /// The local SQLite database at `SeedConfig::db_path`.
    Sqlite,
    /// A hosted table behind PostgREST.
    Rest(RestSettings),
}

impl SinkConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Rest(_) => "rest",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeedConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Bearer token for `/api/admin/*`. Admin routes refuse every request when unset.
    pub admin_token: Option<String>,
    pub geocoder_enabled: bool,
    pub pipeline: PipelineSettings,
    pub session_ttl: Duration,
    pub max_sessions: usize,
    pub rate_per_minute: u32,
    pub sink: SinkConfig,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            db_path: default_db_path(),
            admin_token: None,
            geocoder_enabled: true,
            pipeline: PipelineSettings::default(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            max_sessions: DEFAULT_MAX_SESSIONS,
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            sink: SinkConfig::Sqlite,
        }
    }
}

impl SeedConfig {
    /// Read `BIZSEED_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys keep their defaults;
    /// unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| -> Option<String> {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        let geo_defaults = GeocodeSettings::default();
        let limit_defaults = IngestLimits::default();

        let geocode = GeocodeSettings {
            base_url: get("GEOCODER_URL").unwrap_or(geo_defaults.base_url),
            api_key: get("GEOCODER_KEY"),
            user_agent: get("GEOCODER_USER_AGENT").unwrap_or(geo_defaults.user_agent),
            timeout_secs: parse_or(&get, "GEOCODER_TIMEOUT_SECS", geo_defaults.timeout_secs),
            qps: parse_or(&get, "GEOCODER_QPS", geo_defaults.qps).max(1),
            max_attempts: parse_or(&get, "GEOCODER_MAX_ATTEMPTS", geo_defaults.max_attempts).max(1),
            base_backoff_ms: geo_defaults.base_backoff_ms,
            max_lookups: parse_or(&get, "GEOCODER_MAX_LOOKUPS", geo_defaults.max_lookups),
            cache_ttl_days: parse_or(&get, "GEOCODE_CACHE_TTL_DAYS", geo_defaults.cache_ttl_days),
        };

        let pipeline = PipelineSettings {
            limits: IngestLimits {
                max_rows: parse_or(&get, "MAX_ROWS", limit_defaults.max_rows),
                max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", limit_defaults.max_upload_bytes),
            },
            geocode,
            batch_size: parse_or(&get, "BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
        };

        let sink = match get("SINK").as_deref() {
            None | Some("sqlite") => SinkConfig::Sqlite,
            Some("rest") => match (get("REST_URL"), get("REST_KEY")) {
                (Some(base_url), Some(api_key)) => SinkConfig::Rest(RestSettings {
                    base_url,
                    api_key,
                    table: get("REST_TABLE").unwrap_or_else(|| DEFAULT_REST_TABLE.to_string()),
                    timeout_secs: parse_or(&get, "REST_TIMEOUT_SECS", 30),
                }),
                _ => {
                    tracing::warn!(
                        "{ENV_PREFIX}SINK=rest needs {ENV_PREFIX}REST_URL and {ENV_PREFIX}REST_KEY; using sqlite"
                    );
                    SinkConfig::Sqlite
                }
            },
            Some(other) => {
                tracing::warn!(value = other, "Unknown {ENV_PREFIX}SINK; using sqlite");
                SinkConfig::Sqlite
            }
        };

        let geocoder_enabled = match get("GEOCODER").as_deref() {
            None | Some("nominatim") => true,
            Some("off") | Some("none") => false,
            Some(other) => {
                tracing::warn!(value = other, "Unknown {ENV_PREFIX}GEOCODER; using nominatim");
                true
            }
        };

        Self {
            bind_addr: parse_or(&get, "BIND", defaults.bind_addr),
            db_path: get("DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            admin_token: get("ADMIN_TOKEN"),
            geocoder_enabled,
            pipeline,
            session_ttl: Duration::from_secs(parse_or(
                &get,
                "SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )),
            max_sessions: parse_or(&get, "MAX_SESSIONS", DEFAULT_MAX_SESSIONS).max(1),
            rate_per_minute: parse_or(&get, "RATE_PER_MINUTE", DEFAULT_RATE_PER_MINUTE).max(1),
            sink,
        }
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> T
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(
                variable = %format!("{ENV_PREFIX}{name}"),
                value = %raw,
                "Invalid configuration value; using default"
            );
            default
        }),
    }
}
