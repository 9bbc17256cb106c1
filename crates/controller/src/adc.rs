//! ADS1115 16-bit ADC driver over I2C, one single-ended channel per
//! instance. Reads at PGA ±4.096 V, 128 SPS, single-shot mode, which
//! matches the calibration values in `config.toml` for typical capacitive
//! soil moisture probes and 5 V TDS boards powered through a divider.

use anyhow::Result;
use rppal::i2c::I2c;
use std::{thread, time::Duration};

use crate::sensor::AnalogInput;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       — write 1 to start single-shot conversion
//   [14:12] MUX      — input multiplexer (channel selection)
//   [11:9]  PGA      — programmable gain amplifier
//   [8]     MODE     — 0 = continuous, 1 = single-shot
//   [7:5]   DR       — data rate
//   [4:2]   COMP_*   — comparator config
//   [1:0]   COMP_QUE — 11 = disable comparator (default)

/// Bits common to all channel reads:
///   OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
///   DR=100 (128 SPS), COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX values for single-ended reads (AINx vs GND).
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Maximum valid ADS1115 channel index for single-ended reads.
const MAX_CHANNEL: usize = 3;

/// Conversion time at 128 SPS is ~7.8 ms. We wait 9 ms for margin.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register: conversion-ready flag when read.
const OS_READY_BIT: u16 = 1 << 15;

/// Full-scale range at PGA ±4.096 V over the 15-bit single-ended span.
const FSR_VOLTS: f64 = 4.096;

fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// One single-ended ADS1115 input, addressable as an [`AnalogInput`].
pub struct Ads1115Channel {
    i2c: I2c,
    channel: usize,
}

impl Ads1115Channel {
    /// Open I2C bus 1 and bind to `channel` of the ADS1115 at `addr`.
    pub fn new(addr: u16, channel: usize) -> Result<Self> {
        anyhow::ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0–{MAX_CHANNEL})",
        );

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 channel initialised"
        );

        Ok(Self { i2c, channel })
    }

    /// Perform a single-shot read, returning the raw 16-bit signed value
    /// (0–32767 for single-ended; clamped against bus corruption).
    fn read_counts(&mut self) -> Result<i32> {
        let config_bytes = config_for_channel(self.channel).to_be_bytes();

        // Write config register to start conversion.
        self.i2c.block_write(REG_CONFIG, &config_bytes)?;

        // Wait for conversion to complete.
        thread::sleep(CONVERSION_WAIT);

        // Poll the OS bit to confirm conversion is done. Normally one wait
        // is enough at 128 SPS; we retry briefly to be safe.
        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i32::from(i16::from_be_bytes(buf)).clamp(0, 32767))
    }
}

impl AnalogInput for Ads1115Channel {
    fn read_raw(&mut self) -> Result<i32> {
        self.read_counts()
    }

    fn read_voltage(&mut self) -> Result<f64> {
        Ok(f64::from(self.read_counts()?) / 32767.0 * FSR_VOLTS)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
