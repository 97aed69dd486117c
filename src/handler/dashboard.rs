use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::TimeZone;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    aggregation::aggregate_in,
    configuration::ApiCache,
    coordinator::Outcome,
    error::Error,
    model::{DashboardPayload, DashboardQuery, Slot},
    provider::TelemetryApi,
};

/// Dashboard payload through the short-lived telemetry cache.
pub async fn get_dashboard<B: TelemetryApi>(
    cache: &ApiCache,
    api: &Arc<B>,
    query: DashboardQuery,
) -> Result<DashboardPayload, Error> {
    let key = query.cache_key();
    let api = Arc::clone(api);
    cache
        .dashboards
        .fetch(&key, move || async move { api.get_dashboard(&query).await })
        .await
}

pub async fn get_dashboard_cancellable<B: TelemetryApi>(
    cache: &ApiCache,
    api: &Arc<B>,
    query: DashboardQuery,
    token: &CancellationToken,
) -> Result<Outcome<DashboardPayload>, Error> {
    let key = query.cache_key();
    let api = Arc::clone(api);
    cache
        .dashboards
        .fetch_cancellable(
            &key,
            move || async move { api.get_dashboard(&query).await },
            token,
        )
        .await
}

/// Warms the cache in the background, e.g. on hover. Failures are logged
/// and dropped; the next real read simply fetches again.
pub fn prefetch<B: TelemetryApi>(
    cache: &ApiCache,
    api: &Arc<B>,
    query: DashboardQuery,
) -> JoinHandle<()> {
    let cache = cache.clone();
    let api = Arc::clone(api);
    tokio::spawn(async move {
        let key = query.cache_key();
        if let Err(e) = get_dashboard(&cache, &api, query).await {
            warn!("prefetch of {} failed: {}", key, e);
        }
    })
}

/// Bucketed history built from the payload's raw readings.
pub fn history_slots<Tz: TimeZone>(
    payload: &DashboardPayload,
    query: &DashboardQuery,
    tz: &Tz,
) -> Vec<Slot> {
    aggregate_in(&payload.raw, query.range, tz)
}

/// Call-site state of one dashboard view.
///
/// Device/range switches are debounced, and each new selection cancels
/// the one before it, so only the latest selection's result is ever
/// returned as `Completed`.
pub struct DashboardSession<B> {
    cache: ApiCache,
    api: Arc<B>,
    debounce: Duration,
    current: Mutex<Option<CancellationToken>>,
}

impl<B: TelemetryApi> DashboardSession<B> {
    pub fn new(cache: ApiCache, api: Arc<B>, debounce: Duration) -> Self {
        DashboardSession {
            cache,
            api,
            debounce,
            current: Mutex::new(None),
        }
    }

    pub async fn select(
        &self,
        query: DashboardQuery,
    ) -> Result<Outcome<DashboardPayload>, Error> {
        let token = CancellationToken::new();
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("selection superseded during debounce");
                return Ok(Outcome::Cancelled);
            },
            _ = tokio::time::sleep(self.debounce) => {},
        }

        get_dashboard_cancellable(&self.cache, &self.api, query, &token).await
    }

    /// Abandons whatever selection is in flight, e.g. when the view closes.
    pub fn cancel(&self) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = current {
            token.cancel();
        }
    }
}
