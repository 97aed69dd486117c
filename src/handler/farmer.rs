use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    cache_keys, configuration::ApiCache, error::Error, model::FarmerProfile,
    provider::TelemetryApi,
};

/// Farmer profile through the long-lived profile cache.
pub async fn get_profile<B: TelemetryApi>(
    cache: &ApiCache,
    api: &Arc<B>,
    farmer_id: u64,
) -> Result<FarmerProfile, Error> {
    let api = Arc::clone(api);
    cache
        .profiles
        .fetch(&cache_keys::farmer_profile_key(farmer_id), move || async move {
            api.get_farmer(farmer_id).await
        })
        .await
}

/// Devices the farmer's profile lists.
pub async fn get_devices<B: TelemetryApi>(
    cache: &ApiCache,
    api: &Arc<B>,
    farmer_id: u64,
) -> Result<Vec<String>, Error> {
    let profile = get_profile(cache, api, farmer_id).await?;
    Ok(profile.device_list())
}

/// Full-history CSV export; always fetched fresh.
pub async fn download_csv<B: TelemetryApi>(
    api: &Arc<B>,
    farmer_id: u64,
    device: Option<&str>,
) -> Result<Vec<u8>, Error> {
    api.download_csv(farmer_id, device).await
}

/// Best effort: a failure is logged and otherwise ignored.
pub async fn mark_viewed<B: TelemetryApi>(api: &Arc<B>, farmer_id: u64) {
    if let Err(e) = api.mark_viewed(farmer_id).await {
        warn!("mark-viewed for farmer {} failed: {}", farmer_id, e);
    }
}

/// Call after any change to a farmer so no stale read about them survives.
pub fn farmer_updated(cache: &ApiCache, farmer_id: u64) {
    cache.invalidate_farmer(farmer_id);
    info!("Invalidated cached reads for farmer {}", farmer_id);
}
