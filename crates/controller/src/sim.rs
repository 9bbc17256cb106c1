//! Simulated analog channels for local development (no hardware).
//!
//! The moisture channel models a drying bed: a random walk with a slow
//! drift toward the dry calibration endpoint plus per-reading ADC noise.
//! The TDS channel hovers around a fixed voltage with noise. Both are good
//! enough to exercise the full control loop end to end.

use anyhow::Result;

use crate::sensor::AnalogInput;

/// ADS1115 full-scale range at PGA ±4.096 V, single-ended (15-bit).
const ADC_MAX: f64 = 32767.0;
const ADC_FSR_VOLTS: f64 = 4.096;

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// One simulated analog channel, state in ADC counts.
pub struct SimChannel {
    value: f64,
    drift_per_read: f64,
    noise_sigma: f64,
    min: f64,
    max: f64,
}

impl SimChannel {
    /// Soil moisture probe: starts mid-range between the calibration
    /// endpoints and dries out slowly.
    pub fn moisture(raw_dry: i32, raw_wet: i32) -> Self {
        let dry = f64::from(raw_dry);
        let wet = f64::from(raw_wet);
        let span = wet - dry;
        Self {
            value: dry + span * 0.5,
            // Toward dry, ~2% of the calibration span per read.
            drift_per_read: -span * 0.02,
            noise_sigma: span.abs() * 0.01,
            min: dry.min(wet),
            max: dry.max(wet),
        }
    }

    /// TDS probe hovering around `volts`.
    pub fn tds(volts: f64) -> Self {
        let center = volts / ADC_FSR_VOLTS * ADC_MAX;
        Self {
            value: center,
            drift_per_read: 0.0,
            noise_sigma: ADC_MAX * 0.002,
            min: 0.0,
            max: ADC_MAX,
        }
    }

    fn step(&mut self) -> f64 {
        self.value = (self.value + self.drift_per_read).clamp(self.min, self.max);
        (self.value + self.noise_sigma * approx_std_normal()).clamp(0.0, ADC_MAX)
    }
}

impl AnalogInput for SimChannel {
    fn read_raw(&mut self) -> Result<i32> {
        Ok(self.step() as i32)
    }

    fn read_voltage(&mut self) -> Result<f64> {
        Ok(self.step() / ADC_MAX * ADC_FSR_VOLTS)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moisture_readings_stay_in_adc_range() {
        let mut ch = SimChannel::moisture(21200, 22040);
        for _ in 0..200 {
            let raw = ch.read_raw().unwrap();
            assert!((0..=32767).contains(&raw), "raw out of range: {raw}");
        }
    }

    #[test]
    fn moisture_drifts_toward_dry() {
        let mut ch = SimChannel::moisture(21200, 22040);
        let first = ch.read_raw().unwrap();
        for _ in 0..100 {
            ch.read_raw().unwrap();
        }
        let last = ch.read_raw().unwrap();
        // raw_dry < raw_wet here, so drying means the counts fall.
        assert!(last < first, "expected drying drift: {first} -> {last}");
    }

    #[test]
    fn tds_voltage_stays_near_center() {
        let mut ch = SimChannel::tds(1.6);
        for _ in 0..100 {
            let v = ch.read_voltage().unwrap();
            assert!((1.0..=2.2).contains(&v), "voltage wandered: {v}");
        }
    }
}
