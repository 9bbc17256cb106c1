//! Fire-and-forget telemetry: soil moisture and TDS pushed to the MQTT
//! broker once per cycle. Transport failures are the caller's problem only
//! to the extent of logging them; nothing in the control loop depends on a
//! publish going through.

use anyhow::Result;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

pub trait TelemetrySink {
    async fn publish_reading(&self, soil_moisture: f64, tds: f64) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TelemetryPayload<'a> {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    #[serde(rename = "soilMoisture")]
    soil_moisture: f64,
    tds: f64,
    user: UserRef<'a>,
}

#[derive(Debug, Serialize)]
struct UserRef<'a> {
    #[serde(rename = "userToken")]
    user_token: &'a str,
}

fn payload_json(
    timestamp: OffsetDateTime,
    soil_moisture: f64,
    tds: f64,
    user_token: &str,
) -> Result<Vec<u8>> {
    let payload = TelemetryPayload {
        timestamp,
        soil_moisture,
        tds,
        user: UserRef { user_token },
    };
    Ok(serde_json::to_vec(&payload)?)
}

// ---------------------------------------------------------------------------
// MQTT implementation
// ---------------------------------------------------------------------------

pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    user_token: String,
}

impl MqttSink {
    /// Build the client. The returned event loop must be polled for the
    /// connection to stay alive; main spawns a task for it.
    pub fn new(host: &str, port: u16, topic: &str, user_token: &str) -> (Self, EventLoop) {
        let mut options = MqttOptions::new("irrigation-controller", host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, 10);

        (
            Self {
                client,
                topic: topic.to_string(),
                user_token: user_token.to_string(),
            },
            eventloop,
        )
    }
}

impl TelemetrySink for MqttSink {
    async fn publish_reading(&self, soil_moisture: f64, tds: f64) -> Result<()> {
        let payload = payload_json(
            OffsetDateTime::now_utc(),
            soil_moisture,
            tds,
            &self.user_token,
        )?;
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

/// Keep the MQTT connection alive. Intended to be `tokio::spawn`-ed.
pub async fn run_event_loop(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                tracing::info!("telemetry broker connected");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("telemetry mqtt error: {e}. retrying...");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn payload_has_service_field_names() {
        let bytes = payload_json(datetime!(2025-06-11 08:00:00 UTC), 32.5, 410.0, "tok-1").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["soilMoisture"], 32.5);
        assert_eq!(json["tds"], 410.0);
        assert_eq!(json["user"]["userToken"], "tok-1");
        assert_eq!(json["timestamp"], "2025-06-11T08:00:00Z");
    }

    #[test]
    fn payload_top_level_shape() {
        let bytes = payload_json(datetime!(2025-06-11 08:00:00 UTC), 0.0, 0.0, "t").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert!(obj.contains_key("timestamp"));
        assert!(obj.contains_key("user"));
    }
}
