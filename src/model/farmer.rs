use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::helpers::parse_comma_list;

/// Farmer profile as returned by `GET /farmers/{id}`. Fields this layer
/// does not interpret are kept in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerProfile {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// Comma separated device identifiers.
    #[serde(default)]
    pub devices: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FarmerProfile {
    pub fn device_list(&self) -> Vec<String> {
        parse_comma_list(&self.devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_list() {
        let profile: FarmerProfile = serde_json::from_str(
            r#"{
                "id": 7,
                "name": "Amina",
                "devices": "A, B ,",
                "village": "Kibo"
            }"#,
        )
        .unwrap();

        assert_eq!(profile.device_list(), vec!["A", "B"]);
        assert_eq!(profile.extra.get("village"), Some(&Value::from("Kibo")));
    }
}
