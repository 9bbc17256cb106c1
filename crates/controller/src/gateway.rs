//! Remote-service gateway: weather, crop profile, and irrigation schedule
//! fetched as idempotent GETs keyed by the user token.
//!
//! Each call independently fails soft: a network error, non-2xx status, or
//! malformed body comes back as `Err` ("unavailable") and the orchestrator
//! decides whether to back off. No retries happen here.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use time::{Date, OffsetDateTime};

// ---------------------------------------------------------------------------
// Record types (wire format is camelCase, per the service API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "rainfallmm")]
    pub rainfall_mm: f64,
    #[serde(rename = "etRef")]
    pub et_ref: f64,
    // Carried through for telemetry consumers; not used by the decision path.
    pub humidity: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CropProfile {
    pub name: String,
    #[serde(rename = "minAllowedMoisture")]
    pub min_allowed_moisture: f64,
    #[serde(rename = "coefficientDev")]
    pub coefficient_dev: f64,
    #[serde(rename = "coefficientMid")]
    pub coefficient_mid: f64,
    #[serde(rename = "coefficientLate")]
    pub coefficient_late: f64,
    #[serde(rename = "devNumOfDays")]
    pub dev_days: u32,
    #[serde(rename = "midNumOfDays")]
    pub mid_days: u32,
    #[serde(rename = "latNumOfDays")]
    pub late_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IrrigationSchedule {
    /// Day 0 of the crop cycle. The service sends an RFC 3339 instant;
    /// only the calendar date matters for stage arithmetic.
    #[serde(rename = "irrigationStart", deserialize_with = "rfc3339_date")]
    pub irrigation_start: Date,
    #[serde(rename = "monthlyRainfallMonth")]
    pub monthly_rainfall_month: String,
    #[serde(rename = "monthlyRainfall")]
    pub monthly_rainfall: f64,
    #[serde(rename = "cultivationArea")]
    pub cultivation_area: f64,
}

fn rfc3339_date<'de, D>(deserializer: D) -> Result<Date, D::Error>
where
    D: Deserializer<'de>,
{
    let dt = time::serde::rfc3339::deserialize(deserializer)?;
    Ok(dt.date())
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Read access to the remote environment service. The orchestrator only
/// sees this trait; tests substitute canned records.
pub trait EnvironmentSource {
    async fn weather(&self) -> Result<WeatherSample>;
    async fn crop_profile(&self) -> Result<CropProfile>;
    async fn irrigation_schedule(&self) -> Result<IrrigationSchedule>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    user_token: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, user_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_token: user_token.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("userToken", self.user_token.as_str())])
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned error status"))?;

        resp.json::<T>()
            .await
            .with_context(|| format!("GET {url}: malformed response body"))
    }
}

impl EnvironmentSource for HttpGateway {
    async fn weather(&self) -> Result<WeatherSample> {
        self.get_json("weather").await
    }

    async fn crop_profile(&self) -> Result<CropProfile> {
        self.get_json("crop").await
    }

    async fn irrigation_schedule(&self) -> Result<IrrigationSchedule> {
        self.get_json("irrigation").await
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    // -- WeatherSample deserialization ---------------------------------------

    #[test]
    fn weather_deserialize_valid() {
        let json = r#"{
            "timestamp": "2025-06-11T08:00:00Z",
            "rainfallmm": 0.0,
            "etRef": 5.0,
            "humidity": 61.5,
            "temperature": 24.2
        }"#;
        let w: WeatherSample = serde_json::from_str(json).unwrap();
        assert_eq!(w.rainfall_mm, 0.0);
        assert_eq!(w.et_ref, 5.0);
        assert_eq!(w.timestamp.date(), date!(2025 - 06 - 11));
    }

    #[test]
    fn weather_missing_field_fails() {
        let json = r#"{"timestamp":"2025-06-11T08:00:00Z","rainfallmm":0.0}"#;
        assert!(serde_json::from_str::<WeatherSample>(json).is_err());
    }

    #[test]
    fn weather_bad_timestamp_fails() {
        let json = r#"{
            "timestamp": "yesterday",
            "rainfallmm": 0.0,
            "etRef": 5.0,
            "humidity": 61.5,
            "temperature": 24.2
        }"#;
        assert!(serde_json::from_str::<WeatherSample>(json).is_err());
    }

    // -- CropProfile deserialization -----------------------------------------

    #[test]
    fn crop_deserialize_valid() {
        let json = r#"{
            "name": "Lettuce",
            "minAllowedMoisture": 40.0,
            "coefficientDev": 1.0,
            "coefficientMid": 1.1,
            "coefficientLate": 0.9,
            "devNumOfDays": 30,
            "midNumOfDays": 40,
            "latNumOfDays": 20
        }"#;
        let c: CropProfile = serde_json::from_str(json).unwrap();
        assert_eq!(c.name, "Lettuce");
        assert_eq!(c.min_allowed_moisture, 40.0);
        assert_eq!(c.dev_days, 30);
        assert_eq!(c.late_days, 20);
    }

    #[test]
    fn crop_negative_day_count_fails() {
        let json = r#"{
            "name": "Lettuce",
            "minAllowedMoisture": 40.0,
            "coefficientDev": 1.0,
            "coefficientMid": 1.1,
            "coefficientLate": 0.9,
            "devNumOfDays": -5,
            "midNumOfDays": 40,
            "latNumOfDays": 20
        }"#;
        assert!(serde_json::from_str::<CropProfile>(json).is_err());
    }

    // -- IrrigationSchedule deserialization ------------------------------------

    #[test]
    fn schedule_deserialize_valid() {
        let json = r#"{
            "irrigationStart": "2025-06-20T00:00:00Z",
            "monthlyRainfallMonth": "May",
            "monthlyRainfall": 54.0,
            "cultivationArea": 0.21
        }"#;
        let s: IrrigationSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(s.irrigation_start, date!(2025 - 06 - 20));
        assert_eq!(s.monthly_rainfall_month, "May");
        assert_eq!(s.monthly_rainfall, 54.0);
        assert_eq!(s.cultivation_area, 0.21);
    }

    #[test]
    fn schedule_extra_fields_ignored() {
        let json = r#"{
            "irrigationStart": "2025-06-20T00:00:00Z",
            "monthlyRainfallMonth": "May",
            "monthlyRainfall": 54.0,
            "cultivationArea": 0.21,
            "owner": "greenhouse-1"
        }"#;
        assert!(serde_json::from_str::<IrrigationSchedule>(json).is_ok());
    }

    #[test]
    fn schedule_malformed_date_fails() {
        let json = r#"{
            "irrigationStart": "20/06/2025",
            "monthlyRainfallMonth": "May",
            "monthlyRainfall": 54.0,
            "cultivationArea": 0.21
        }"#;
        assert!(serde_json::from_str::<IrrigationSchedule>(json).is_err());
    }

    // -- URL handling -----------------------------------------------------------

    #[test]
    fn gateway_trims_trailing_slash() {
        let gw = HttpGateway::new("http://svc.local/api/", "tok");
        assert_eq!(gw.base_url, "http://svc.local/api");
    }
}
