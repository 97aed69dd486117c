//! Background sweep of expired cache entries
//!
//! Reads only evict the key they touch, so dashboard keys for device and
//! range combinations nobody asks for again would otherwise stay resident
//! for the life of the process.

use std::time::Duration;

use tokio::{task::JoinHandle, time::interval};
use tracing::{debug, info};

use crate::configuration::ApiCache;

/// Spawns the sweep loop. The task runs until its handle is aborted.
pub fn spawn(api_cache: ApiCache, period: Duration) -> JoinHandle<()> {
    tokio::spawn(cache_sweep_task(api_cache, period))
}

pub async fn cache_sweep_task(api_cache: ApiCache, period: Duration) {
    info!("Starting cache sweep every {:?}", period);

    let mut check_interval = interval(period.max(Duration::from_secs(1)));
    // the first tick completes immediately
    check_interval.tick().await;

    loop {
        check_interval.tick().await;

        let evicted = api_cache.cleanup_expired();
        if evicted > 0 {
            debug!(evicted, "cache sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{configuration::Config, model::DashboardPayload};

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_keys_never_read_again() {
        let mut config = Config::new("http://telemetry.test");
        config.telemetry_cache_ttl = Duration::from_secs(30);
        let api_cache = ApiCache::new(&config);
        api_cache
            .dashboards
            .cache()
            .set("farmers/7/sensors/dashboard", DashboardPayload::default());

        let sweeper = spawn(api_cache.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(api_cache.dashboards.cache().is_empty());

        sweeper.abort();
    }
}
