use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::hal::{Hal, HalError, Result};

/// Last indicator action requested through the contract, with the timing
/// parameters the controller passed along.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedState {
    Off,
    RedSolid,
    BlueSolid,
    RedBlink {
        on: Duration,
        off: Duration,
        fade_in: Duration,
        fade_out: Duration,
    },
    BlueBlink {
        on: Duration,
        off: Duration,
        fade_in: Duration,
        fade_out: Duration,
    },
}

#[derive(Debug)]
struct SimState {
    temps: VecDeque<f64>,
    fail_sensor: bool,
    fail_display: bool,
    led_state: LedState,
    last_display: (String, String),
    serial_out: Vec<String>,
    close_count: usize,
}

/// Simulated hardware backend: deterministic sensor readings, recorded
/// outputs, no I/O. Stands in for the Raspberry Pi backend in the demo
/// binary and in tests.
///
/// The sensor cycles through a fixed sequence of readings; every output
/// operation records what would have been sent to hardware so callers can
/// inspect it afterwards.
#[derive(Debug)]
pub struct SimHal {
    inner: Mutex<SimState>,
}

impl Default for SimHal {
    fn default() -> Self {
        Self::new(vec![72.0])
    }
}

impl SimHal {
    pub fn new(temps: Vec<f64>) -> SimHal {
        let temps = if temps.is_empty() { vec![72.0] } else { temps };
        SimHal {
            inner: Mutex::new(SimState {
                temps: temps.into(),
                fail_sensor: false,
                fail_display: false,
                led_state: LedState::Off,
                last_display: (String::new(), String::new()),
                serial_out: Vec::new(),
                close_count: 0,
            }),
        }
    }

    // Recover from poisoning instead of propagating it; the sim holds no
    // invariants that a panicked holder could have broken.
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the simulated reading sequence.
    pub fn set_temps(&self, temps: Vec<f64>) {
        let mut state = self.state();
        state.temps = if temps.is_empty() {
            VecDeque::from(vec![72.0])
        } else {
            temps.into()
        };
    }

    /// Pin the sensor to a single constant reading.
    pub fn set_temperature(&self, temp: f64) {
        self.set_temps(vec![temp]);
    }

    /// Make every subsequent sensor read fail.
    pub fn fail_sensor(&self, fail: bool) {
        self.state().fail_sensor = fail;
    }

    /// Make every subsequent display write fail.
    pub fn fail_display(&self, fail: bool) {
        self.state().fail_display = fail;
    }

    pub fn led_state(&self) -> LedState {
        self.state().led_state.clone()
    }

    pub fn last_display(&self) -> (String, String) {
        self.state().last_display.clone()
    }

    pub fn serial_out(&self) -> Vec<String> {
        self.state().serial_out.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state().close_count
    }
}

impl Hal for SimHal {
    fn read_temp_f(&self) -> Result<f64> {
        let mut state = self.state();
        if state.fail_sensor {
            return Err(HalError::Sensor("simulated sensor failure".to_string()));
        }
        // Rotate so the next call returns the next reading in the sequence.
        let temp = state.temps[0];
        state.temps.rotate_left(1);
        Ok(temp)
    }

    fn leds_off(&self) -> Result<()> {
        self.state().led_state = LedState::Off;
        Ok(())
    }

    fn red_solid(&self) -> Result<()> {
        self.state().led_state = LedState::RedSolid;
        Ok(())
    }

    fn blue_solid(&self) -> Result<()> {
        self.state().led_state = LedState::BlueSolid;
        Ok(())
    }

    fn red_blink(
        &self,
        on: Duration,
        off: Duration,
        fade_in: Duration,
        fade_out: Duration,
    ) -> Result<()> {
        self.state().led_state = LedState::RedBlink {
            on,
            off,
            fade_in,
            fade_out,
        };
        Ok(())
    }

    fn blue_blink(
        &self,
        on: Duration,
        off: Duration,
        fade_in: Duration,
        fade_out: Duration,
    ) -> Result<()> {
        self.state().led_state = LedState::BlueBlink {
            on,
            off,
            fade_in,
            fade_out,
        };
        Ok(())
    }

    fn display(&self, line1: &str, line2: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_display {
            return Err(HalError::Display("simulated display failure".to_string()));
        }
        state.last_display = (line1.to_string(), line2.to_string());
        Ok(())
    }

    fn serial_send(&self, message: &str) -> Result<()> {
        info!("telemetry: {}", message);
        self.state().serial_out.push(message.to_string());
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state();
        state.led_state = LedState::Off;
        state.last_display = (String::new(), String::new());
        state.close_count += 1;
    }
}
