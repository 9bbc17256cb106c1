//! Sensor sampling: averaged analog reads converted to calibrated units.
//!
//! Raw transducer access sits behind [`AnalogInput`]; everything above that
//! line only ever sees "moisture percent" and "TDS ppm". Each sample run
//! discards a warm-up prefix (capacitive probes need a settling period after
//! the channel is energised), then averages a fixed number of reads spaced a
//! short delay apart.

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// One analog channel. `read_raw` returns ADC counts (moisture probe),
/// `read_voltage` the measured voltage (TDS probe). Implementations must
/// report transducer failures as `Err`, never panic.
pub trait AnalogInput {
    fn read_raw(&mut self) -> Result<i32>;
    fn read_voltage(&mut self) -> Result<f64>;
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SensorCalibration {
    /// Raw ADC value in dry soil (0% reference).
    pub raw_dry: i32,
    /// Raw ADC value in saturated soil (100% reference).
    pub raw_wet: i32,
    /// TDS probe calibration constant.
    pub tds_probe_factor: f64,
    /// Reads discarded at the start of every sample run.
    pub warmup_reads: u32,
    /// Reads averaged after warm-up.
    pub sample_reads: u32,
    /// Delay between consecutive reads.
    pub sample_delay: Duration,
}

/// Linear two-point calibration from raw counts to percent, clamped so an
/// out-of-range raw value never escapes [0, 100].
pub fn moisture_from_raw(raw: f64, raw_dry: i32, raw_wet: i32) -> f64 {
    let span = f64::from(raw_wet) - f64::from(raw_dry);
    let pct = 100.0 * (raw - f64::from(raw_dry)) / span;
    pct.clamp(0.0, 100.0)
}

/// TDS conversion: `ppm = v * 1000 / 5 * probe_factor`.
pub fn tds_from_voltage(voltage: f64, probe_factor: f64) -> f64 {
    voltage * 1000.0 / 5.0 * probe_factor
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

pub struct SensorSampler<M: AnalogInput, T: AnalogInput> {
    moisture: M,
    tds: T,
    cal: SensorCalibration,
}

impl<M: AnalogInput, T: AnalogInput> SensorSampler<M, T> {
    pub fn new(moisture: M, tds: T, cal: SensorCalibration) -> Self {
        Self { moisture, tds, cal }
    }

    /// Averaged soil moisture in percent, in [0, 100].
    pub async fn moisture_percent(&mut self) -> Result<f64> {
        for _ in 0..self.cal.warmup_reads {
            self.moisture.read_raw()?;
            sleep(self.cal.sample_delay).await;
        }

        let mut sum = 0.0;
        for _ in 0..self.cal.sample_reads.max(1) {
            sum += f64::from(self.moisture.read_raw()?);
            sleep(self.cal.sample_delay).await;
        }
        let mean = sum / f64::from(self.cal.sample_reads.max(1));

        Ok(moisture_from_raw(mean, self.cal.raw_dry, self.cal.raw_wet))
    }

    /// Averaged TDS in ppm (>= 0 for any non-negative probe voltage).
    pub async fn tds_ppm(&mut self) -> Result<f64> {
        for _ in 0..self.cal.warmup_reads {
            self.tds.read_voltage()?;
            sleep(self.cal.sample_delay).await;
        }

        let mut sum = 0.0;
        for _ in 0..self.cal.sample_reads.max(1) {
            sum += self.tds.read_voltage()?;
            sleep(self.cal.sample_delay).await;
        }
        let mean = sum / f64::from(self.cal.sample_reads.max(1));

        Ok(tds_from_voltage(mean, self.cal.tds_probe_factor))
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::testing::ScriptedInput;
    use super::*;

    fn cal() -> SensorCalibration {
        SensorCalibration {
            raw_dry: 21200,
            raw_wet: 22040,
            tds_probe_factor: 1.5,
            warmup_reads: 2,
            sample_reads: 3,
            sample_delay: Duration::ZERO,
        }
    }

    // -- Calibration math ----------------------------------------------------

    #[test]
    fn dry_reference_maps_to_zero() {
        assert_eq!(moisture_from_raw(21200.0, 21200, 22040), 0.0);
    }

    #[test]
    fn wet_reference_maps_to_hundred() {
        assert_eq!(moisture_from_raw(22040.0, 21200, 22040), 100.0);
    }

    #[test]
    fn midpoint_maps_to_fifty() {
        assert_eq!(moisture_from_raw(21620.0, 21200, 22040), 50.0);
    }

    #[test]
    fn below_dry_clamps_to_zero() {
        assert_eq!(moisture_from_raw(15000.0, 21200, 22040), 0.0);
    }

    #[test]
    fn above_wet_clamps_to_hundred() {
        assert_eq!(moisture_from_raw(30000.0, 21200, 22040), 100.0);
    }

    #[test]
    fn tds_conversion_matches_probe_formula() {
        // 2.0 V * 1000 / 5 * 1.5 = 600 ppm
        assert_eq!(tds_from_voltage(2.0, 1.5), 600.0);
    }

    #[test]
    fn tds_zero_voltage_is_zero_ppm() {
        assert_eq!(tds_from_voltage(0.0, 1.5), 0.0);
    }

    // -- Sampler behaviour ----------------------------------------------------

    #[tokio::test]
    async fn warmup_reads_are_discarded() {
        // First two reads are garbage; the mean of the remaining three is the
        // wet reference, so the result must be exactly 100%.
        let moisture = ScriptedInput::raw(&[0, 0, 22040, 22040, 22040]);
        let tds = ScriptedInput::volts(&[0.0]);
        let mut sampler = SensorSampler::new(moisture, tds, cal());

        let pct = sampler.moisture_percent().await.unwrap();
        assert_eq!(pct, 100.0);
    }

    #[tokio::test]
    async fn samples_are_arithmetic_mean() {
        // Post-warmup reads 21200, 21620, 22040 → mean 21620 → 50%.
        let moisture = ScriptedInput::raw(&[0, 0, 21200, 21620, 22040]);
        let tds = ScriptedInput::volts(&[0.0]);
        let mut sampler = SensorSampler::new(moisture, tds, cal());

        let pct = sampler.moisture_percent().await.unwrap();
        assert_eq!(pct, 50.0);
    }

    #[tokio::test]
    async fn tds_sampler_averages_voltage() {
        let moisture = ScriptedInput::raw(&[0]);
        // Post-warmup 1.0, 2.0, 3.0 → mean 2.0 V → 600 ppm.
        let tds = ScriptedInput::volts(&[9.9, 9.9, 1.0, 2.0, 3.0]);
        let mut sampler = SensorSampler::new(moisture, tds, cal());

        let ppm = sampler.tds_ppm().await.unwrap();
        assert_eq!(ppm, 600.0);
    }

    #[tokio::test]
    async fn transducer_error_surfaces_as_err() {
        let mut sampler =
            SensorSampler::new(ScriptedInput::failing(), ScriptedInput::failing(), cal());
        assert!(sampler.moisture_percent().await.is_err());
        assert!(sampler.tds_ppm().await.is_err());
    }
}
