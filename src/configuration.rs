use std::{env, fs, io::ErrorKind, ops::Deref, sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    cache_keys,
    coordinator::RequestCoordinator,
    error::Error,
    handler::cache_sweeper,
    helpers::{formatter, Formatter},
    model::{DashboardPayload, FarmerProfile},
    provider::HTTP,
};

pub const TELEMETRY_CACHE: &str = "telemetry";
pub const PROFILE_CACHE: &str = "profile";

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

/// The two cache namespaces with their own lifetimes: telemetry reads go
/// stale quickly, profile reads much more slowly.
#[derive(Debug, Clone)]
pub struct ApiCache {
    pub dashboards: RequestCoordinator<DashboardPayload>,
    pub profiles: RequestCoordinator<FarmerProfile>,
}

impl ApiCache {
    pub fn new(config: &Config) -> ApiCache {
        ApiCache {
            dashboards: RequestCoordinator::new(
                TELEMETRY_CACHE,
                config.telemetry_cache_ttl,
            ),
            profiles: RequestCoordinator::new(
                PROFILE_CACHE,
                config.profile_cache_ttl,
            ),
        }
    }

    /// Drop every cached read about one farmer, e.g. after editing them.
    pub fn invalidate_farmer(&self, farmer_id: u64) {
        let namespace = cache_keys::farmer_namespace(farmer_id);
        self.dashboards.invalidate_prefix(&namespace);
        self.profiles.invalidate_prefix(&namespace);
    }

    pub fn clear(&self) {
        self.dashboards.clear();
        self.profiles.clear();
    }

    /// Evicts expired entries in both namespaces.
    pub fn cleanup_expired(&self) -> usize {
        self.dashboards.cleanup_expired() + self.profiles.cleanup_expired()
    }
}

#[derive(Debug)]
pub struct State {
    pub config: Config,
    pub http: Arc<HTTP>,
    pub api_cache: ApiCache,
    sweeper: JoinHandle<()>,
}

impl State {
    /// Must be called inside a tokio runtime: the expired-entry sweep is
    /// spawned here and lives as long as the state.
    pub fn new(config: Config, http: HTTP) -> State {
        let api_cache = ApiCache::new(&config);
        let sweeper = cache_sweeper::spawn(
            api_cache.clone(),
            config.cache_sweep_interval,
        );
        State {
            config,
            http: Arc::new(http),
            api_cache,
            sweeper,
        }
    }

    /// Session teardown: nothing cached or in flight survives a logout.
    pub fn logout(&self) {
        self.api_cache.clear();
        info!("Session cache cleared");
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub timeout: u64,
    pub telemetry_cache_ttl: Duration,
    pub profile_cache_ttl: Duration,
    pub debounce: Duration,
    pub cache_sweep_interval: Duration,
    pub auth: Option<String>,
}

impl Config {
    pub fn new(api_host: &str) -> Config {
        Config {
            api_host: api_host.trim_end_matches('/').to_owned(),
            timeout: 30,
            telemetry_cache_ttl: Duration::from_secs(30),
            profile_cache_ttl: Duration::from_secs(5 * 60),
            debounce: Duration::from_millis(300),
            cache_sweep_interval: Duration::from_secs(60),
            auth: None,
        }
    }

    pub fn get_farmer_url(&self, farmer_id: u64) -> String {
        self.url(FARMER_PATH, farmer_id)
    }

    pub fn get_dashboard_url(&self, farmer_id: u64) -> String {
        self.url(DASHBOARD_PATH, farmer_id)
    }

    pub fn get_download_url(&self, farmer_id: u64) -> String {
        self.url(DOWNLOAD_PATH, farmer_id)
    }

    pub fn get_mark_viewed_url(&self, farmer_id: u64) -> String {
        self.url(MARK_VIEWED_PATH, farmer_id)
    }

    fn url(&self, path: &str, farmer_id: u64) -> String {
        format!(
            "{}{}",
            self.api_host,
            formatter(path.to_owned(), &[Formatter::NumberU64(farmer_id)])
        )
    }
}

const FARMER_PATH: &str = "/farmers/$0";
const DASHBOARD_PATH: &str = "/farmers/$0/sensors/dashboard";
const DOWNLOAD_PATH: &str = "/farmers/$0/sensors/download";
const MARK_VIEWED_PATH: &str = "/farmers/$0/mark-viewed";

pub fn get_configuration() -> Result<Config, Error> {
    let api_host = env::var("API_HOST")?;
    url::Url::parse(&api_host)?;

    let mut config = Config::new(&api_host);

    if let Some(timeout) = optional_var("TIMEOUT")? {
        config.timeout = timeout.parse()?;
    }
    if let Some(ttl) = optional_var("TELEMETRY_CACHE_TTL_IN_SEC")? {
        config.telemetry_cache_ttl = Duration::from_secs(ttl.parse()?);
    }
    if let Some(ttl) = optional_var("PROFILE_CACHE_TTL_IN_SEC")? {
        config.profile_cache_ttl = Duration::from_secs(ttl.parse()?);
    }
    if let Some(debounce) = optional_var("DEBOUNCE_IN_MS")? {
        config.debounce = Duration::from_millis(debounce.parse()?);
    }
    if let Some(period) = optional_var("CACHE_SWEEP_INTERVAL_IN_SEC")? {
        let period: u64 = period.parse()?;
        if period == 0 {
            return Err(Error::ConfigurationError(
                "CACHE_SWEEP_INTERVAL_IN_SEC must be positive".to_string(),
            ));
        }
        config.cache_sweep_interval = Duration::from_secs(period);
    }
    config.auth = optional_var("AUTH")?.filter(|token| !token.is_empty());

    Ok(config)
}

fn optional_var(key: &str) -> Result<Option<String>, Error> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::VAR(e)),
    }
}

/// Loads `.env` from the crate directory into the process environment.
/// Variables already set in the environment win.
pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";

    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);

    let config_string = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No {} found, using process environment", path);
            return Ok(());
        },
        Err(e) => return Err(Error::Io(e)),
    };

    for (key, value) in parse_config_string(&config_string) {
        if env::var_os(key).is_none() {
            env::set_var(key, value);
        }
    }

    Ok(())
}

fn parse_config_string(config: &str) -> Vec<(&str, &str)> {
    config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}
