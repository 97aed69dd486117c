use serde::{Deserialize, Serialize};

use super::{
    deserialize_optional_reading, deserialize_readings, RangeSelector,
    RawReading, Slot,
};
use crate::cache_keys;

/// Unit of data fetched and cached per (farmer, device, range).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPayload {
    #[serde(default, deserialize_with = "deserialize_optional_reading")]
    pub latest: Option<RawReading>,
    #[serde(default)]
    pub slots: Vec<Slot>,
    #[serde(default, deserialize_with = "deserialize_readings")]
    pub raw: Vec<RawReading>,
    #[serde(default)]
    pub allowed_devices: Vec<String>,
}

/// Parameters of `GET /farmers/{id}/sensors/dashboard`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DashboardQuery {
    pub farmer_id: u64,
    pub device: Option<String>,
    pub range: RangeSelector,
    pub view: Option<String>,
    pub slot_range: Option<String>,
    pub include_raw: bool,
}

impl DashboardQuery {
    pub fn new(farmer_id: u64, range: RangeSelector) -> Self {
        DashboardQuery {
            farmer_id,
            device: None,
            range,
            view: None,
            slot_range: None,
            include_raw: false,
        }
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn slot_range(mut self, slot_range: impl Into<String>) -> Self {
        self.slot_range = Some(slot_range.into());
        self
    }

    pub fn include_raw(mut self, include_raw: bool) -> Self {
        self.include_raw = include_raw;
        self
    }

    /// Query string pairs, shared by the request and its cache key.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("range", self.range.as_str().to_string()),
            ("includeRaw", self.include_raw.to_string()),
        ];
        if let Some(device) = &self.device {
            params.push(("device", device.to_owned()));
        }
        if let Some(view) = &self.view {
            params.push(("view", view.to_owned()));
        }
        if let Some(slot_range) = &self.slot_range {
            params.push(("slotRange", slot_range.to_owned()));
        }
        params
    }

    pub fn cache_key(&self) -> String {
        cache_keys::dashboard_key(self.farmer_id, self.params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_covers_every_param() {
        let query = DashboardQuery::new(7, RangeSelector::OneDay)
            .device("A")
            .view("chart")
            .slot_range("24h")
            .include_raw(true);

        assert_eq!(
            query.cache_key(),
            "farmers/7/sensors/dashboard?\
             device=A&includeRaw=true&range=24h&slotRange=24h&view=chart"
        );
        assert_ne!(query.cache_key(), query.clone().device("B").cache_key());
    }

    #[test]
    fn test_payload_from_backend_json() {
        let payload: DashboardPayload = serde_json::from_str(
            r#"{
                "latest": {
                    "device": "A",
                    "timestamp": "2026-03-01T10:00:00Z",
                    "temperature": 22
                },
                "slots": [{
                    "label": "10:00",
                    "timestampLocal": "2026-03-01 10:00:00",
                    "temperature": 22,
                    "ph": null
                }],
                "raw": [
                    {"device": "A", "timestamp": "2026-03-01T10:00:00Z"},
                    {"device": "A", "timestamp": "not a time"}
                ],
                "allowedDevices": ["A", "B"]
            }"#,
        )
        .unwrap();

        assert_eq!(payload.latest.unwrap().temperature, Some(22.0));
        assert_eq!(payload.slots[0].temperature, Some(22.0));
        assert_eq!(payload.slots[0].ph, None);
        assert_eq!(payload.raw.len(), 1);
        assert_eq!(payload.allowed_devices, vec!["A", "B"]);
    }
}
