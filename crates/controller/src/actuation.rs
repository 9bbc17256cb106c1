//! Closed-loop valve actuation: run a valve for a computed time budget while
//! watching live sensor feedback, and account for whatever demand was left
//! unsatisfied.
//!
//! ## Per-run state machine
//!
//! ```text
//! Idle ──[open valve]──▶ Running ──[budget elapsed | sensor cutoff | shutdown]──▶ Stopped
//! ```
//!
//! The transition to Stopped closes the valve unconditionally: every exit
//! path out of the poll loop goes through it, including the early sensor
//! cutoff and an externally requested shutdown. The poll tick is sub-second;
//! moisture is re-sampled only at a coarser interval so the probe is not
//! hammered on every tick. TDS settles slower and is a lower-precision loop,
//! so it re-samples every tick and never feeds back into water demand.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::sensor::{AnalogInput, SensorSampler};
use crate::valve::{Valve, ValveBoard};

// ---------------------------------------------------------------------------
// Config and outcome types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActuationConfig {
    pub flow_rate_l_per_min: f64,
    /// Poll-loop tick for elapsed-time bookkeeping.
    pub tick: Duration,
    /// How often moisture is re-sampled during a water run.
    pub moisture_sample_interval: Duration,
    pub optimal_tds_ppm: f64,
    pub fertilizer_dose_per_liter: f64,
}

/// Result of one water-valve run.
#[derive(Debug, Clone)]
pub struct ActuationOutcome {
    pub elapsed: Duration,
    /// Last moisture reading taken during the run, if any succeeded.
    pub final_moisture: Option<f64>,
    /// Unsatisfied demand in liters; becomes the carried-over demand for the
    /// next gated cycle, replacing the previous value.
    pub remaining_liters: f64,
}

/// Result of one fertilizer-valve run.
#[derive(Debug, Clone)]
pub struct FertilizerOutcome {
    pub elapsed: Duration,
    pub final_tds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Budget,
    SensorCutoff,
    Shutdown,
}

// ---------------------------------------------------------------------------
// Planning arithmetic (pure, unit-tested directly)
// ---------------------------------------------------------------------------

/// Total planned run time for a required volume at the configured flow rate.
pub fn planned_water_duration(required_liters: f64, flow_rate_l_per_min: f64) -> Duration {
    Duration::from_secs_f64(required_liters / flow_rate_l_per_min * 60.0)
}

/// Liters left undelivered when a run stops after `elapsed` of `planned`.
pub fn remaining_liters(planned: Duration, elapsed: Duration, flow_rate_l_per_min: f64) -> f64 {
    let left = planned.as_secs_f64() - elapsed.as_secs_f64();
    (left.max(0.0) / 60.0) * flow_rate_l_per_min
}

/// Dose size proportional to the water actually delivered this cycle.
pub fn fertilizer_dose_liters(water_delivered_liters: f64, dose_per_liter: f64) -> f64 {
    water_delivered_liters * dose_per_liter
}

// ---------------------------------------------------------------------------
// Water supply
// ---------------------------------------------------------------------------

/// Open the water valve for up to `required_liters` worth of flow, cutting
/// out early if a fresh moisture reading climbs above
/// `min_allowed_moisture` or shutdown is requested. The valve is closed on
/// every exit path.
///
/// A failed mid-run moisture read is logged and the run continues on the
/// time budget alone.
pub async fn supply_water<M: AnalogInput, T: AnalogInput>(
    valves: &mut ValveBoard,
    sampler: &mut SensorSampler<M, T>,
    cfg: &ActuationConfig,
    shutdown: &mut watch::Receiver<bool>,
    required_liters: f64,
    min_allowed_moisture: f64,
) -> ActuationOutcome {
    let planned = planned_water_duration(required_liters, cfg.flow_rate_l_per_min);

    info!(
        required_liters,
        planned_sec = planned.as_secs_f64(),
        min_allowed_moisture,
        "water run starting"
    );

    // Idle -> Running
    valves.set(Valve::Water, true);
    let started = Instant::now();
    let mut last_sample: Option<Instant> = None;
    let mut final_moisture: Option<f64> = None;

    let cause = loop {
        if *shutdown.borrow() {
            break StopCause::Shutdown;
        }
        if started.elapsed() >= planned {
            break StopCause::Budget;
        }

        let sample_due = last_sample
            .map_or(true, |t| t.elapsed() >= cfg.moisture_sample_interval);
        if sample_due {
            last_sample = Some(Instant::now());
            match sampler.moisture_percent().await {
                Ok(m) => {
                    final_moisture = Some(m);
                    if m > min_allowed_moisture {
                        break StopCause::SensorCutoff;
                    }
                }
                Err(e) => {
                    warn!("moisture read failed mid-run, continuing on time budget: {e:#}");
                }
            }
        }

        sleep(cfg.tick).await;
    };

    // Running -> Stopped: close unconditionally, whatever ended the loop.
    valves.set(Valve::Water, false);

    let elapsed = started.elapsed();
    let remaining = remaining_liters(planned, elapsed, cfg.flow_rate_l_per_min);

    info!(
        cause = ?cause,
        elapsed_sec = elapsed.as_secs_f64(),
        remaining_liters = remaining,
        final_moisture = ?final_moisture,
        "water run stopped"
    );

    ActuationOutcome {
        elapsed,
        final_moisture,
        remaining_liters: remaining,
    }
}

// ---------------------------------------------------------------------------
// Fertilizer supply
// ---------------------------------------------------------------------------

/// Dose fertilizer proportionally to the water actually delivered this
/// cycle. Stops when TDS reaches the optimal level or the dose duration
/// elapses; the valve is closed on every exit path.
pub async fn supply_fertilizer<M: AnalogInput, T: AnalogInput>(
    valves: &mut ValveBoard,
    sampler: &mut SensorSampler<M, T>,
    cfg: &ActuationConfig,
    shutdown: &mut watch::Receiver<bool>,
    water_delivered_liters: f64,
) -> FertilizerOutcome {
    let dose = fertilizer_dose_liters(water_delivered_liters, cfg.fertilizer_dose_per_liter);
    let duration = Duration::from_secs_f64(dose / cfg.flow_rate_l_per_min * 60.0);

    info!(
        water_delivered_liters,
        dose_liters = dose,
        duration_sec = duration.as_secs_f64(),
        "fertilizer run starting"
    );

    valves.set(Valve::Fertilizer, true);
    let started = Instant::now();
    let mut final_tds: Option<f64> = None;

    let cause = loop {
        if *shutdown.borrow() {
            break StopCause::Shutdown;
        }
        if started.elapsed() >= duration {
            break StopCause::Budget;
        }

        match sampler.tds_ppm().await {
            Ok(t) => {
                final_tds = Some(t);
                if t >= cfg.optimal_tds_ppm {
                    break StopCause::SensorCutoff;
                }
            }
            Err(e) => {
                warn!("tds read failed mid-run, continuing on time budget: {e:#}");
            }
        }

        sleep(cfg.tick).await;
    };

    valves.set(Valve::Fertilizer, false);

    let elapsed = started.elapsed();
    info!(
        cause = ?cause,
        elapsed_sec = elapsed.as_secs_f64(),
        final_tds = ?final_tds,
        "fertilizer run stopped"
    );

    FertilizerOutcome { elapsed, final_tds }
}

// ===========================================================================
// Tests
// ===========================================================================
