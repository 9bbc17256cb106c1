//! TOML config file loading and validation. Everything the core logic needs
//! (broker address, user token, calibration constants, flow rate, gate
//! windows) is supplied here at process start; nothing is hard-coded in the
//! control path.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::actuation::ActuationConfig;
use crate::sensor::SensorCalibration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    pub sensors: SensorSection,
    pub actuation: ActuationSection,
    #[serde(default)]
    pub timing: TimingSection,
    pub valves: ValveSection,
}

#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    pub base_url: String,
    pub user_token: String,
}

#[derive(Debug, Deserialize)]
pub struct MqttSection {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct SensorSection {
    /// Raw ADC value in dry soil (0% reference).
    pub raw_dry: i32,
    /// Raw ADC value in saturated soil (100% reference).
    pub raw_wet: i32,
    #[serde(default = "default_warmup_reads")]
    pub warmup_reads: u32,
    #[serde(default = "default_sample_reads")]
    pub sample_reads: u32,
    #[serde(default = "default_sample_delay_ms")]
    pub sample_delay_ms: u64,
    #[serde(default = "default_tds_probe_factor")]
    pub tds_probe_factor: f64,
}

#[derive(Debug, Deserialize)]
pub struct ActuationSection {
    pub flow_rate_l_per_min: f64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_moisture_sample_sec")]
    pub moisture_sample_sec: u64,
    pub optimal_tds_ppm: f64,
    pub fertilizer_dose_per_liter: f64,
}

#[derive(Debug, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: u64,
    #[serde(default = "default_sensor_backoff_sec")]
    pub sensor_backoff_sec: u64,
    #[serde(default = "default_gateway_backoff_sec")]
    pub gateway_backoff_sec: u64,
    #[serde(default = "default_water_recalc_hours")]
    pub water_recalc_hours: u64,
    #[serde(default = "default_fertilizer_interval_hours")]
    pub fertilizer_interval_hours: u64,
}

#[derive(Debug, Deserialize)]
pub struct ValveSection {
    pub water_gpio_pin: u8,
    pub fertilizer_gpio_pin: u8,
    #[serde(default = "default_active_low")]
    pub active_low: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_mqtt_host() -> String {
    "127.0.0.1".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_topic() -> String {
    "sensor-data".to_string()
}
fn default_warmup_reads() -> u32 {
    2
}
fn default_sample_reads() -> u32 {
    5
}
fn default_sample_delay_ms() -> u64 {
    50
}
fn default_tds_probe_factor() -> f64 {
    1.5
}
fn default_tick_ms() -> u64 {
    100
}
fn default_moisture_sample_sec() -> u64 {
    5
}
fn default_poll_interval_sec() -> u64 {
    900 // 15 min between orchestrator iterations
}
fn default_sensor_backoff_sec() -> u64 {
    30
}
fn default_gateway_backoff_sec() -> u64 {
    300
}
fn default_water_recalc_hours() -> u64 {
    24
}
fn default_fertilizer_interval_hours() -> u64 {
    168 // weekly
}
fn default_active_low() -> bool {
    true
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            poll_interval_sec: default_poll_interval_sec(),
            sensor_backoff_sec: default_sensor_backoff_sec(),
            gateway_backoff_sec: default_gateway_backoff_sec(),
            water_recalc_hours: default_water_recalc_hours(),
            fertilizer_interval_hours: default_fertilizer_interval_hours(),
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Maximum single-ended reading from the ADS1115 (15-bit unsigned).
const ADS1115_MAX: i32 = 32767;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.service.base_url.trim().is_empty() {
            errors.push("service.base_url is empty".to_string());
        }
        if self.service.user_token.trim().is_empty() {
            errors.push("service.user_token is empty".to_string());
        }

        self.validate_sensors(&mut errors);
        self.validate_actuation(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_valves(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let s = &self.sensors;
        if s.raw_dry < 0 || s.raw_dry > ADS1115_MAX {
            errors.push(format!(
                "sensors.raw_dry {} out of ADS1115 range [0, {ADS1115_MAX}]",
                s.raw_dry
            ));
        }
        if s.raw_wet < 0 || s.raw_wet > ADS1115_MAX {
            errors.push(format!(
                "sensors.raw_wet {} out of ADS1115 range [0, {ADS1115_MAX}]",
                s.raw_wet
            ));
        }
        if s.raw_dry == s.raw_wet {
            errors.push(format!(
                "sensors.raw_dry and raw_wet are both {}: calibration range is zero",
                s.raw_dry
            ));
        }
        if s.sample_reads == 0 {
            errors.push("sensors.sample_reads must be at least 1".to_string());
        }
        if s.tds_probe_factor <= 0.0 {
            errors.push(format!(
                "sensors.tds_probe_factor must be positive, got {}",
                s.tds_probe_factor
            ));
        }
    }

    fn validate_actuation(&self, errors: &mut Vec<String>) {
        let a = &self.actuation;
        if a.flow_rate_l_per_min <= 0.0 {
            errors.push(format!(
                "actuation.flow_rate_l_per_min must be positive, got {}",
                a.flow_rate_l_per_min
            ));
        }
        if a.tick_ms == 0 {
            errors.push("actuation.tick_ms must be positive".to_string());
        }
        if a.moisture_sample_sec == 0 {
            errors.push("actuation.moisture_sample_sec must be positive".to_string());
        }
        if a.optimal_tds_ppm <= 0.0 {
            errors.push(format!(
                "actuation.optimal_tds_ppm must be positive, got {}",
                a.optimal_tds_ppm
            ));
        }
        if a.fertilizer_dose_per_liter <= 0.0 {
            errors.push(format!(
                "actuation.fertilizer_dose_per_liter must be positive, got {}",
                a.fertilizer_dose_per_liter
            ));
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        if t.poll_interval_sec == 0 {
            errors.push("timing.poll_interval_sec must be positive".to_string());
        }
        if t.water_recalc_hours == 0 {
            errors.push("timing.water_recalc_hours must be positive".to_string());
        }
        if t.fertilizer_interval_hours == 0 {
            errors.push("timing.fertilizer_interval_hours must be positive".to_string());
        }
    }

    fn validate_valves(&self, errors: &mut Vec<String>) {
        let v = &self.valves;
        for (label, pin) in [
            ("valves.water_gpio_pin", v.water_gpio_pin),
            ("valves.fertilizer_gpio_pin", v.fertilizer_gpio_pin),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{label} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if v.water_gpio_pin == v.fertilizer_gpio_pin {
            errors.push(format!(
                "valves.water_gpio_pin and fertilizer_gpio_pin are both {}: valves must be independently addressable",
                v.water_gpio_pin
            ));
        }
    }

    // -- Derived views -------------------------------------------------------

    pub fn calibration(&self) -> SensorCalibration {
        SensorCalibration {
            raw_dry: self.sensors.raw_dry,
            raw_wet: self.sensors.raw_wet,
            tds_probe_factor: self.sensors.tds_probe_factor,
            warmup_reads: self.sensors.warmup_reads,
            sample_reads: self.sensors.sample_reads,
            sample_delay: Duration::from_millis(self.sensors.sample_delay_ms),
        }
    }

    pub fn actuation(&self) -> ActuationConfig {
        ActuationConfig {
            flow_rate_l_per_min: self.actuation.flow_rate_l_per_min,
            tick: Duration::from_millis(self.actuation.tick_ms),
            moisture_sample_interval: Duration::from_secs(self.actuation.moisture_sample_sec),
            optimal_tds_ppm: self.actuation.optimal_tds_ppm,
            fertilizer_dose_per_liter: self.actuation.fertilizer_dose_per_liter,
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_TOML: &str = r#"
[service]
base_url = "http://svc.local/api"
user_token = "123"

[sensors]
raw_dry = 21200
raw_wet = 22040

[actuation]
flow_rate_l_per_min = 1.0
optimal_tds_ppm = 800.0
fertilizer_dose_per_liter = 0.01

[valves]
water_gpio_pin = 17
fertilizer_gpio_pin = 27
"#;

    fn valid_config() -> Config {
        toml::from_str(VALID_TOML).unwrap()
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_minimal_config() {
        let cfg = valid_config();
        assert_eq!(cfg.service.user_token, "123");
        assert_eq!(cfg.sensors.raw_dry, 21200);
        assert_eq!(cfg.valves.water_gpio_pin, 17);
    }

    #[test]
    fn defaults_applied_for_omitted_sections() {
        let cfg = valid_config();
        assert_eq!(cfg.mqtt.host, "127.0.0.1");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.topic, "sensor-data");
        assert_eq!(cfg.timing.poll_interval_sec, 900);
        assert_eq!(cfg.timing.water_recalc_hours, 24);
        assert_eq!(cfg.timing.fertilizer_interval_hours, 168);
        assert!(cfg.valves.active_low);
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn missing_required_section_fails_parse() {
        // No [service] section.
        let toml_str = r#"
[sensors]
raw_dry = 21200
raw_wet = 22040
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    // -- Validation ---------------------------------------------------------

    #[test]
    fn empty_user_token_rejected() {
        let mut cfg = valid_config();
        cfg.service.user_token = "  ".into();
        assert_validation_err(&cfg, "user_token is empty");
    }

    #[test]
    fn zero_calibration_range_rejected() {
        let mut cfg = valid_config();
        cfg.sensors.raw_wet = cfg.sensors.raw_dry;
        assert_validation_err(&cfg, "calibration range is zero");
    }

    #[test]
    fn calibration_out_of_adc_range_rejected() {
        let mut cfg = valid_config();
        cfg.sensors.raw_wet = 40000;
        assert_validation_err(&cfg, "raw_wet");
    }

    #[test]
    fn negative_flow_rate_rejected() {
        let mut cfg = valid_config();
        cfg.actuation.flow_rate_l_per_min = -1.0;
        assert_validation_err(&cfg, "flow_rate_l_per_min");
    }

    #[test]
    fn zero_sample_reads_rejected() {
        let mut cfg = valid_config();
        cfg.sensors.sample_reads = 0;
        assert_validation_err(&cfg, "sample_reads");
    }

    #[test]
    fn invalid_gpio_pin_rejected() {
        let mut cfg = valid_config();
        cfg.valves.water_gpio_pin = 1; // reserved for ID EEPROM
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn shared_gpio_pin_rejected() {
        let mut cfg = valid_config();
        cfg.valves.fertilizer_gpio_pin = cfg.valves.water_gpio_pin;
        assert_validation_err(&cfg, "independently addressable");
    }

    #[test]
    fn zero_gate_window_rejected() {
        let mut cfg = valid_config();
        cfg.timing.water_recalc_hours = 0;
        assert_validation_err(&cfg, "water_recalc_hours");
    }

    #[test]
    fn multiple_errors_reported_together() {
        let mut cfg = valid_config();
        cfg.service.user_token = "".into();
        cfg.actuation.flow_rate_l_per_min = 0.0;
        cfg.valves.fertilizer_gpio_pin = cfg.valves.water_gpio_pin;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "got: {msg}");
    }

    // -- Derived views --------------------------------------------------------

    #[test]
    fn derived_calibration_matches_sections() {
        let cfg = valid_config();
        let cal = cfg.calibration();
        assert_eq!(cal.raw_dry, 21200);
        assert_eq!(cal.raw_wet, 22040);
        assert_eq!(cal.sample_delay, Duration::from_millis(50));
    }

    #[test]
    fn derived_actuation_matches_sections() {
        let cfg = valid_config();
        let a = cfg.actuation();
        assert_eq!(a.flow_rate_l_per_min, 1.0);
        assert_eq!(a.tick, Duration::from_millis(100));
        assert_eq!(a.moisture_sample_interval, Duration::from_secs(5));
    }
}
