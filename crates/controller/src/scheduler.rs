//! Control-loop orchestrator: sequences sampling, telemetry, remote fetches,
//! the decision gate, and valve actuation on a fixed polling cadence.
//!
//! One iteration per cycle, data flowing one direction:
//!
//! ```text
//! sampler ──▶ gate ──▶ gateway (weather/crop/schedule) ──▶ decision
//!    ──▶ water actuation ──▶ fertilizer gate ──▶ telemetry sink
//! ```
//!
//! The orchestrator owns all timers and the only mutable state in the
//! process (`SchedulerState`); components receive what they need as
//! parameters. Collaborator failures never propagate past this module;
//! they pick the backoff for the next iteration and nothing else.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::actuation::{supply_fertilizer, supply_water, ActuationConfig};
use crate::decision::{self, DecisionError};
use crate::gateway::EnvironmentSource;
use crate::sensor::{AnalogInput, SensorSampler};
use crate::telemetry::TelemetrySink;
use crate::valve::ValveBoard;

// ---------------------------------------------------------------------------
// Timing and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerTiming {
    /// Sleep between normal iterations.
    pub poll_interval: Duration,
    /// Sleep after a sensor fault before restarting the iteration.
    pub sensor_backoff: Duration,
    /// Sleep after a remote-service failure.
    pub gateway_backoff: Duration,
    /// Minimum elapsed time before water demand is recomputed.
    pub water_recalc_window: Duration,
    /// Minimum elapsed time between fertilizer dosing events.
    pub fertilizer_interval: Duration,
}

/// Process-lifetime scheduler state. Mutated only here, after a successful
/// decision or actuation.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pub last_water_calc: Option<OffsetDateTime>,
    pub last_fertilizer: Option<OffsetDateTime>,
    /// Demand carried over from the previous gated cycle, in liters. Each
    /// actuation run *replaces* this with its unsatisfied remainder.
    pub pending_required_water: f64,
}

/// What one iteration did, and therefore which pause follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Gate not met, or nothing left to deliver.
    Idle,
    /// Sensor read failed; short backoff.
    SensorFault,
    /// A remote record was unavailable; longer backoff.
    Unavailable,
    /// Irrigation start date is in the future: skip the branch, keep running.
    ConfigError,
    Watered {
        delivered_liters: f64,
        fertilized: bool,
    },
}

// ---------------------------------------------------------------------------
// Gate predicates (pure)
// ---------------------------------------------------------------------------

/// Irrigate only when the soil is drier than the crop allows and no rain
/// fell today.
pub fn should_irrigate(moisture_percent: f64, min_allowed: f64, rainfall_mm: f64) -> bool {
    moisture_percent < min_allowed && rainfall_mm == 0.0
}

/// A gated action is due when it never ran or its window has elapsed.
pub fn gate_due(last: Option<OffsetDateTime>, now: OffsetDateTime, window: Duration) -> bool {
    match last {
        None => true,
        Some(t) => now - t >= window,
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<E, S, M, T>
where
    E: EnvironmentSource,
    S: TelemetrySink,
    M: AnalogInput,
    T: AnalogInput,
{
    gateway: E,
    telemetry: S,
    sampler: SensorSampler<M, T>,
    valves: ValveBoard,
    actuation: ActuationConfig,
    timing: SchedulerTiming,
    state: SchedulerState,
    shutdown: watch::Receiver<bool>,
}

impl<E, S, M, T> Orchestrator<E, S, M, T>
where
    E: EnvironmentSource,
    S: TelemetrySink,
    M: AnalogInput,
    T: AnalogInput,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: E,
        telemetry: S,
        sampler: SensorSampler<M, T>,
        valves: ValveBoard,
        actuation: ActuationConfig,
        timing: SchedulerTiming,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            telemetry,
            sampler,
            valves,
            actuation,
            timing,
            state: SchedulerState::default(),
            shutdown,
        }
    }

    /// Run iterations until shutdown is requested, then close both valves.
    pub async fn run(mut self) {
        info!(
            poll_sec = self.timing.poll_interval.as_secs(),
            "orchestrator started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let outcome = self.run_cycle().await;

            let pause = match &outcome {
                CycleOutcome::SensorFault => self.timing.sensor_backoff,
                CycleOutcome::Unavailable => self.timing.gateway_backoff,
                _ => self.timing.poll_interval,
            };
            info!(?outcome, pause_sec = pause.as_secs(), "cycle complete");

            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        // Hard requirement on the shutdown path: both valves closed before exit.
        self.valves.all_off();
        info!("orchestrator stopped, valves released");
    }

    /// One control-loop iteration.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        // 1-2. Sample, then push telemetry (best-effort).
        let moisture = match self.sampler.moisture_percent().await {
            Ok(m) => m,
            Err(e) => {
                error!("moisture read failed: {e:#}");
                return CycleOutcome::SensorFault;
            }
        };
        let tds = match self.sampler.tds_ppm().await {
            Ok(t) => t,
            Err(e) => {
                error!("tds read failed: {e:#}");
                return CycleOutcome::SensorFault;
            }
        };
        info!(moisture, tds, "sensors sampled");

        if let Err(e) = self.telemetry.publish_reading(moisture, tds).await {
            warn!("telemetry publish failed (ignored): {e:#}");
        }

        // 3-4. Weather and crop profile.
        let weather = match self.gateway.weather().await {
            Ok(w) => w,
            Err(e) => {
                warn!("weather unavailable: {e:#}");
                return CycleOutcome::Unavailable;
            }
        };
        let crop = match self.gateway.crop_profile().await {
            Ok(c) => c,
            Err(e) => {
                warn!("crop profile unavailable: {e:#}");
                return CycleOutcome::Unavailable;
            }
        };

        // 5. Decision gate.
        if !should_irrigate(moisture, crop.min_allowed_moisture, weather.rainfall_mm) {
            info!(
                moisture,
                min = crop.min_allowed_moisture,
                rainfall_mm = weather.rainfall_mm,
                "gate not met, no irrigation this cycle"
            );
            return CycleOutcome::Idle;
        }

        // 6. Schedule fetch and (possibly) demand recompute.
        let schedule = match self.gateway.irrigation_schedule().await {
            Ok(s) => s,
            Err(e) => {
                warn!("irrigation schedule unavailable: {e:#}");
                return CycleOutcome::Unavailable;
            }
        };

        let now = OffsetDateTime::now_utc();
        if gate_due(self.state.last_water_calc, now, self.timing.water_recalc_window) {
            match decision::required_water_liters(weather.et_ref, &crop, &schedule, now.date()) {
                Ok(demand) => {
                    self.state.pending_required_water = demand;
                    self.state.last_water_calc = Some(now);
                    info!(demand_liters = demand, "water demand recomputed");
                }
                Err(e @ DecisionError::FutureStartDate(_)) => {
                    error!("demand calculation rejected: {e}");
                    return CycleOutcome::ConfigError;
                }
            }
        } else {
            info!(
                pending_liters = self.state.pending_required_water,
                "reusing carried-over demand"
            );
        }

        // 7. Actuate.
        let demand = self.state.pending_required_water;
        if demand <= 0.0 {
            return CycleOutcome::Idle;
        }

        let outcome = supply_water(
            &mut self.valves,
            &mut self.sampler,
            &self.actuation,
            &mut self.shutdown,
            demand,
            crop.min_allowed_moisture,
        )
        .await;

        let delivered = (demand - outcome.remaining_liters).max(0.0);
        self.state.pending_required_water = outcome.remaining_liters;

        let mut fertilized = false;
        if delivered > 0.0
            && gate_due(self.state.last_fertilizer, now, self.timing.fertilizer_interval)
        {
            supply_fertilizer(
                &mut self.valves,
                &mut self.sampler,
                &self.actuation,
                &mut self.shutdown,
                delivered,
            )
            .await;
            self.state.last_fertilizer = Some(now);
            fertilized = true;
        }

        CycleOutcome::Watered {
            delivered_liters: delivered,
            fertilized,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &SchedulerState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut SchedulerState {
        &mut self.state
    }

    #[cfg(test)]
    pub(crate) fn valves(&self) -> &ValveBoard {
        &self.valves
    }
}

// ===========================================================================
// Tests
// ===========================================================================
