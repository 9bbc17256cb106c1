//! Valve control via GPIO. The `hardware` feature gates the real rppal
//! driver; without it, a mock implementation records state changes so tests
//! can assert on them.
//!
//! Both valves default closed at init, and `all_off` is the fail-safe used
//! on shutdown and fault paths.

use anyhow::Result;
use std::fmt;

#[cfg(feature = "hardware")]
use rppal::gpio::{Gpio, OutputPin};

/// The two independently addressable valves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valve {
    Water,
    Fertilizer,
}

impl Valve {
    const ALL: [Valve; 2] = [Valve::Water, Valve::Fertilizer];

    fn index(self) -> usize {
        match self {
            Valve::Water => 0,
            Valve::Fertilizer => 1,
        }
    }
}

impl fmt::Display for Valve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Valve::Water => write!(f, "water"),
            Valve::Fertilizer => write!(f, "fertilizer"),
        }
    }
}

// ---------------------------------------------------------------------------
// Real GPIO valve board (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "hardware")]
pub struct ValveBoard {
    pins: [OutputPin; 2], // indexed by Valve::index()
    open: [bool; 2],
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "hardware")]
impl ValveBoard {
    pub fn new(water_pin: u8, fertilizer_pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = [
            gpio.get(water_pin)?.into_output(),
            gpio.get(fertilizer_pin)?.into_output(),
        ];

        // Fail-safe: ensure both valves are closed at startup.
        for pin in &mut pins {
            if active_low {
                pin.set_high(); // active-low relay OFF
            } else {
                pin.set_low();
            }
        }

        Ok(Self {
            pins,
            open: [false; 2],
            active_low,
        })
    }

    pub fn set(&mut self, valve: Valve, open: bool) {
        let pin = &mut self.pins[valve.index()];
        if self.active_low {
            // active-low relay: LOW = open, HIGH = closed
            if open {
                pin.set_low()
            } else {
                pin.set_high()
            }
        } else {
            if open {
                pin.set_high()
            } else {
                pin.set_low()
            }
        }
        self.open[valve.index()] = open;
        tracing::info!(valve = %valve, "valve set {}", if open { "OPEN" } else { "CLOSED" });
    }

    pub fn is_open(&self, valve: Valve) -> bool {
        self.open[valve.index()]
    }

    pub fn all_off(&mut self) {
        for v in Valve::ALL {
            self.set(v, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Mock valve board (development and tests — no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "hardware"))]
pub struct ValveBoard {
    open: [bool; 2],
    /// Every state change in order, for test assertions.
    pub(crate) transitions: Vec<(Valve, bool)>,
}

#[cfg(not(feature = "hardware"))]
impl ValveBoard {
    pub fn new(water_pin: u8, fertilizer_pin: u8, _active_low: bool) -> Result<Self> {
        tracing::info!(
            water_pin,
            fertilizer_pin,
            "[mock-gpio] valve board initialised (no hardware)"
        );
        Ok(Self {
            open: [false; 2],
            transitions: Vec::new(),
        })
    }

    pub fn set(&mut self, valve: Valve, open: bool) {
        self.open[valve.index()] = open;
        self.transitions.push((valve, open));
        tracing::info!(valve = %valve, "[mock-gpio] valve set {}", if open { "OPEN" } else { "CLOSED" });
    }

    pub fn is_open(&self, valve: Valve) -> bool {
        self.open[valve.index()]
    }

    pub fn all_off(&mut self) {
        for v in Valve::ALL {
            self.set(v, false);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
