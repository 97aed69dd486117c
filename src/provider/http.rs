use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, info};

use super::TelemetryApi;
use crate::{
    configuration::Config,
    error::{self, Error},
    model::{DashboardPayload, DashboardQuery, FarmerProfile},
};

#[derive(Debug)]
pub struct HTTP {
    pub config: Config,
    pub http: Client,
}

impl HTTP {
    pub fn new(config: Config) -> Result<HTTP, Error> {
        let http = match Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                return Err(error::Error::ReqwestError(e));
            },
        };

        Ok(HTTP { config, http })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Hands non-2xx responses back as `Error::Backend` with the body as sent.
    async fn check(response: Response) -> Result<Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            status: status.as_u16(),
            body,
        })
    }
}

impl TelemetryApi for HTTP {
    async fn get_farmer(&self, farmer_id: u64) -> Result<FarmerProfile, Error> {
        let url = self.config.get_farmer_url(farmer_id);
        info!("{}", &url);
        let response = self.authorized(self.http.get(url)).send().await?;
        let json = Self::check(response)
            .await?
            .json::<FarmerProfile>()
            .await?;
        Ok(json)
    }

    async fn get_dashboard(
        &self,
        query: &DashboardQuery,
    ) -> Result<DashboardPayload, Error> {
        let url = self.config.get_dashboard_url(query.farmer_id);
        let params = query.params();
        info!("{} {:?}", &url, &params);
        let response = self
            .authorized(self.http.get(url).query(&params))
            .send()
            .await?;
        let json = Self::check(response)
            .await?
            .json::<DashboardPayload>()
            .await?;
        debug!(
            slots = json.slots.len(),
            raw = json.raw.len(),
            "dashboard payload received"
        );
        Ok(json)
    }

    async fn download_csv(
        &self,
        farmer_id: u64,
        device: Option<&str>,
    ) -> Result<Vec<u8>, Error> {
        let url = self.config.get_download_url(farmer_id);
        info!("{}", &url);
        let mut request = self.http.get(url);
        if let Some(device) = device {
            request = request.query(&[("device", device)]);
        }
        let response = self.authorized(request).send().await?;
        let data = Self::check(response).await?.bytes().await?;
        Ok(data.to_vec())
    }

    async fn mark_viewed(&self, farmer_id: u64) -> Result<(), Error> {
        let url = self.config.get_mark_viewed_url(farmer_id);
        let response = self.authorized(self.http.post(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
