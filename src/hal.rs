use std::time::Duration;

use thiserror::Error;

pub mod sim;

#[derive(Error, Clone, Debug)]
pub enum HalError {
    #[error("sensor read failed: {0}")]
    Sensor(String),
    #[error("led update failed: {0}")]
    Led(String),
    #[error("display write failed: {0}")]
    Display(String),
    #[error("serial send failed: {0}")]
    Serial(String),
}

pub type Result<T> = std::result::Result<T, HalError>;

/// Hardware boundary of the thermostat. The controller talks exclusively to
/// this trait; concrete backends (Raspberry Pi GPIO/I2C/UART, the simulated
/// backend) live behind it and never leak device types upward.
///
/// Methods take `&self` so a single backend can be shared between the button
/// handlers and the background loop; backends use interior mutability where
/// they need it. Implementations of the blink operations are responsible for
/// switching the opposite color off.
pub trait Hal: Send + Sync {
    /// Current ambient temperature in degrees Fahrenheit.
    fn read_temp_f(&self) -> Result<f64>;

    fn leds_off(&self) -> Result<()>;

    fn red_solid(&self) -> Result<()>;

    fn blue_solid(&self) -> Result<()>;

    /// Blink/fade the red indicator to signal active heating demand.
    fn red_blink(
        &self,
        on: Duration,
        off: Duration,
        fade_in: Duration,
        fade_out: Duration,
    ) -> Result<()>;

    /// Blink/fade the blue indicator to signal active cooling demand.
    fn blue_blink(
        &self,
        on: Duration,
        off: Duration,
        fade_in: Duration,
        fade_out: Duration,
    ) -> Result<()>;

    /// Write both lines of the character display. Implementations may
    /// truncate or pad to the physical width.
    fn display(&self, line1: &str, line2: &str) -> Result<()>;

    /// Send one telemetry payload over the serial link.
    fn serial_send(&self, message: &str) -> Result<()>;

    /// Return the hardware to a safe resting state: indicators off, display
    /// cleared, ports closed. Idempotent and best-effort; never fails.
    fn close(&self);
}
