use std::future::Future;

use crate::{
    error::Error,
    model::{DashboardPayload, DashboardQuery, FarmerProfile},
};

pub use self::http::HTTP;

mod http;

/// The telemetry/profile backend as seen by the handlers.
pub trait TelemetryApi: Send + Sync + 'static {
    fn get_farmer(
        &self,
        farmer_id: u64,
    ) -> impl Future<Output = Result<FarmerProfile, Error>> + Send;

    fn get_dashboard(
        &self,
        query: &DashboardQuery,
    ) -> impl Future<Output = Result<DashboardPayload, Error>> + Send;

    fn download_csv(
        &self,
        farmer_id: u64,
        device: Option<&str>,
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    fn mark_viewed(
        &self,
        farmer_id: u64,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
