use std::time::Duration;

/// Static configuration for the thermostat. A single read-only value object
/// so timing and threshold constants live in one place instead of being
/// scattered through controller or backend logic.
///
/// The pin and serial fields are opaque to the controller; only a concrete
/// hardware backend interprets them.
#[derive(Clone, Debug)]
pub struct ThermostatConfig {
    // GPIO pin assignments (backend concern).
    pub red_led_pin: u8,
    pub blue_led_pin: u8,
    pub btn_state_pin: u8,
    pub btn_up_pin: u8,
    pub btn_down_pin: u8,

    // Setpoint bounds, enforced by the controller on every adjustment.
    // Precondition: min_setpoint <= default_setpoint <= max_setpoint.
    pub default_setpoint: i32,
    pub min_setpoint: i32,
    pub max_setpoint: i32,

    // Periodic behavior. The display refresh is the tick interval of the
    // background loop; the other two cadences are counted in ticks.
    pub display_refresh: Duration,
    pub serial_send_interval_ticks: u64,
    pub light_refresh_every_ticks: u64,

    // Indicator animation timing, passed through to the backend.
    pub blink_on: Duration,
    pub blink_off: Duration,
    pub fade_in: Duration,
    pub fade_out: Duration,

    // UART settings (backend concern).
    pub serial_port: String,
    pub serial_baud: u32,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        ThermostatConfig {
            red_led_pin: 18,
            blue_led_pin: 23,
            btn_state_pin: 24,
            btn_up_pin: 12,
            btn_down_pin: 25,
            default_setpoint: 72,
            min_setpoint: 50,
            max_setpoint: 90,
            display_refresh: Duration::from_secs(1),
            serial_send_interval_ticks: 30,
            light_refresh_every_ticks: 10,
            blink_on: Duration::from_secs(1),
            blink_off: Duration::from_secs(1),
            fade_in: Duration::from_millis(500),
            fade_out: Duration::from_millis(500),
            serial_port: "/dev/ttyS0".to_string(),
            serial_baud: 115_200,
        }
    }
}
