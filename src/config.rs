use std::env;
use std::time::Duration;

/// Runtime configuration, resolved once at process start from the
/// environment the same way `location.rs::geocode_address` resolves its
/// geocoder settings: typed env lookups with sane production defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_db: String,
    pub postgres_user: String,
    pub postgres_password: String,

    pub dedup_dt_threshold_secs: i64,
    pub dedup_dd_threshold_km: f64,
    pub dedup_dm_threshold: f64,

    pub source_pool_width: usize,
    pub event_pool_width: usize,
    pub dedup_pool_width: usize,

    pub http_timeout: Duration,

    pub ign_base_url: String,
    pub usgs_base_url: String,
    pub emsc_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            postgres_host: env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string()),
            postgres_port: env_parsed("POSTGRES_PORT", 5432),
            postgres_db: env::var("POSTGRES_DB")
                .unwrap_or_else(|_| "seismic_catalog".to_string()),
            postgres_user: env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string()),
            postgres_password: env::var("POSTGRES_PASSWORD")
                .unwrap_or_else(|_| "postgres".to_string()),

            dedup_dt_threshold_secs: env_parsed("DEDUP_DT_THRESHOLD_SECS", 8),
            dedup_dd_threshold_km: env_parsed("DEDUP_DD_THRESHOLD_KM", 8.0),
            dedup_dm_threshold: env_parsed("DEDUP_DM_THRESHOLD", 0.7),

            source_pool_width: env_parsed("SOURCE_POOL_WIDTH", 3),
            event_pool_width: env_parsed("EVENT_POOL_WIDTH", 4),
            dedup_pool_width: env_parsed("DEDUP_POOL_WIDTH", 4),

            http_timeout: Duration::from_secs(env_parsed("HTTP_TIMEOUT_SECS", 20)),

            ign_base_url: env::var("IGN_BASE_URL").unwrap_or_else(|_| {
                "https://www.ign.es/web/resources/sismologia/tproximos/terremotos.js".to_string()
            }),
            usgs_base_url: env::var("USGS_BASE_URL").unwrap_or_else(|_| {
                "https://earthquake.usgs.gov/fdsnws/event/1/query".to_string()
            }),
            emsc_base_url: env::var("EMSC_BASE_URL").unwrap_or_else(|_| {
                "https://www.seismicportal.eu/fdsnws/event/1/query".to_string()
            }),
        }
    }

    pub fn postgres_connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.postgres_host,
            self.postgres_port,
            self.postgres_db,
            self.postgres_user,
            self.postgres_password
        )
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}
