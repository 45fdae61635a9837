use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{Address, Fix};

/// Envelope of the `recentPositions` endpoint.
#[derive(Debug, Deserialize)]
pub struct PositionsResponse {
    pub data: PositionsData,
}

#[derive(Debug, Deserialize)]
pub struct PositionsData {
    #[serde(default)]
    pub positions: Vec<VendorPosition>,
}

/// A position exactly as reported by the telematics vendor.
#[derive(Clone, Debug, Deserialize)]
pub struct VendorPosition {
    #[serde(deserialize_with = "lenient_string")]
    pub timestamp: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub mileage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, rename = "battExtVolts")]
    pub batt_ext_volts: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fix: String,
    #[serde(default)]
    pub hdop: Option<f64>,
}

impl VendorPosition {
    pub fn into_fix(self, address: Address) -> Fix {
        Fix {
            timestamp: self.timestamp,
            latitude: self.lat,
            longitude: self.lon,
            speed: self.speed,
            mileage: self.mileage,
            battery: self.batt_ext_volts,
            fix: self.fix,
            hdop: self.hdop,
            description: self.description,
            address,
        }
    }
}

// The vendor is loose with types: numbers, booleans and nulls all show up in text fields.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_vendor_payload() {
        let json = r#"{
            "data": {
                "positions": [
                    {
                        "timestamp": "2024-10-18T10:15:00",
                        "lat": 45.4642,
                        "lon": 9.19,
                        "speed": 42.0,
                        "mileage": 120345.5,
                        "description": "In movimento",
                        "battExtVolts": 12.6,
                        "fix": 3,
                        "hdop": 0.9
                    },
                    {
                        "timestamp": "2024-10-18T10:00:00",
                        "lat": 45.4,
                        "lon": 9.1,
                        "speed": null,
                        "description": null,
                        "fix": true
                    }
                ]
            }
        }"#;

        let response: PositionsResponse = serde_json::from_str(json).unwrap();
        let positions = response.data.positions;
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].fix, "3");
        assert_eq!(positions[0].batt_ext_volts, Some(12.6));
        assert_eq!(positions[1].speed, None);
        assert_eq!(positions[1].description, "");
        assert_eq!(positions[1].fix, "true");

        let fix = positions[0].clone().into_fix(Address::default());
        assert_eq!(fix.battery, Some(12.6));
        assert_eq!(fix.mileage, Some(120345.5));
        assert_eq!(fix.latitude, 45.4642);
    }
}
