//! Payloads exchanged with the telemetry backend and the slots produced
//! from them.

mod dashboard;
mod farmer;
mod range_selector;
mod reading;
mod slot;

pub use dashboard::{DashboardPayload, DashboardQuery};
pub use farmer::FarmerProfile;
pub use range_selector::RangeSelector;
pub use reading::{
    deserialize_optional_reading, deserialize_readings, RawReading,
};
pub use slot::{MetricStats, Slot};
