//! Click payloads delivered over the wire and persisted in history records.

use serde::{Deserialize, Serialize};

/// Geographic coordinates resolved from the visitor's IP address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

/// Screen dimensions reported by the visitor's browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayDimensions {
    pub width: u32,
    pub height: u32,
}

/// Timezone details resolved for the visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneInfo {
    /// Offset from UTC in minutes.
    pub utc_offset: i32,
    pub offset_name_long: String,
    pub offset_name_short: String,
}

/// One recorded visit to a shortened link.
///
/// Only the timestamp and source address are always present; everything else
/// depends on what enrichment succeeded upstream. Absent fields are omitted
/// from the wire form entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEntry {
    /// When the click happened, in epoch milliseconds.
    pub time: u64,
    /// Source IP address of the visitor.
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_dimensions: Option<DisplayDimensions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<TimezoneInfo>,
}

impl ClickEntry {
    /// Create an entry with only the required fields set.
    #[must_use]
    pub fn new(time: u64, ip: impl Into<String>) -> Self {
        Self {
            time,
            ip: ip.into(),
            city: None,
            state: None,
            country: None,
            provider: None,
            browser: None,
            os: None,
            coordinates: None,
            display_dimensions: None,
            language: None,
            timezone: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_entry_serializes_without_optional_fields() {
        let entry = ClickEntry::new(1_700_000_000_000, "203.0.113.7");
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "time": 1_700_000_000_000u64, "ip": "203.0.113.7" })
        );
    }

    #[test]
    fn enriched_entry_uses_camel_case_field_names() {
        let entry = ClickEntry {
            display_dimensions: Some(DisplayDimensions {
                width: 1920,
                height: 1080,
            }),
            timezone: Some(TimezoneInfo {
                utc_offset: -300,
                offset_name_long: "Eastern Standard Time".to_string(),
                offset_name_short: "EST".to_string(),
            }),
            ..ClickEntry::new(1_700_000_000_000, "203.0.113.7")
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["displayDimensions"]["width"], 1920);
        assert_eq!(json["timezone"]["utcOffset"], -300);
        assert_eq!(json["timezone"]["offsetNameShort"], "EST");
    }

    #[test]
    fn entry_roundtrips_through_json() {
        let entry = ClickEntry {
            city: Some("Lisbon".to_string()),
            country: Some("PT".to_string()),
            coordinates: Some(Coordinates {
                longitude: -9.1393,
                latitude: 38.7223,
            }),
            ..ClickEntry::new(1_700_000_000_000, "198.51.100.4")
        };

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: ClickEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }
}
