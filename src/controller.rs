use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::ThermostatConfig;
use crate::hal::{Hal, HalError};

/// How long `stop` waits for the display loop before releasing hardware
/// anyway.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Ticks in one display alternation window; the first half shows the
/// temperature line, the second half the mode/setpoint line.
const ALT_WINDOW: u8 = 10;

/// Current demand type of the thermostat. `cycle_mode` is the only
/// transition, in the fixed order off -> heat -> cool -> off.
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum OperatingMode {
    Off,
    Heat,
    Cool,
}

impl OperatingMode {
    pub fn next(self) -> OperatingMode {
        match self {
            OperatingMode::Off => OperatingMode::Heat,
            OperatingMode::Heat => OperatingMode::Cool,
            OperatingMode::Cool => OperatingMode::Off,
        }
    }
}

impl Default for OperatingMode {
    fn default() -> Self {
        OperatingMode::Off
    }
}

impl Display for OperatingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Off => write!(f, "off"),
            OperatingMode::Heat => write!(f, "heat"),
            OperatingMode::Cool => write!(f, "cool"),
        }
    }
}

#[derive(Error, Debug)]
#[error("Invalid operating mode")]
pub struct InvalidOperatingMode;

impl FromStr for OperatingMode {
    type Err = InvalidOperatingMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(OperatingMode::Off),
            "heat" => Ok(OperatingMode::Heat),
            "cool" => Ok(OperatingMode::Cool),
            _ => Err(InvalidOperatingMode),
        }
    }
}

/// Indicator output decided by the policy, before timing parameters are
/// attached.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IndicatorAction {
    AllOff,
    RedSolid,
    RedBlink,
    BlueSolid,
    BlueBlink,
}

/// Decide the indicator output for the given mode, temperature, and
/// setpoint. Pure function; the temperature is floored first so sub-degree
/// sensor noise near the threshold cannot toggle the indicators rapidly.
pub fn indicator_action(mode: OperatingMode, temp_f: f64, set_point: i32) -> IndicatorAction {
    let temp = temp_f.floor() as i64;
    let set_point = i64::from(set_point);
    match mode {
        OperatingMode::Off => IndicatorAction::AllOff,
        OperatingMode::Heat => {
            if temp < set_point {
                IndicatorAction::RedBlink
            } else {
                IndicatorAction::RedSolid
            }
        }
        OperatingMode::Cool => {
            if temp > set_point {
                IndicatorAction::BlueBlink
            } else {
                IndicatorAction::BlueSolid
            }
        }
    }
}

#[derive(Debug)]
struct ControllerState {
    mode: OperatingMode,
    set_point: i32,
    ticks: u64,
    alt: u8,
}

/// Thermostat controller: owns the operating-mode state machine and the
/// setpoint, runs the periodic display/telemetry loop, and talks to hardware
/// exclusively through the [`Hal`] contract.
///
/// The button handlers may be called from any task or thread concurrently
/// with the background loop; all shared state sits behind a single mutex and
/// hardware calls are issued outside it, so a slow peripheral can never
/// stall a button press.
#[derive(Debug)]
pub struct Controller<H: Hal + 'static> {
    hal: Arc<H>,
    cfg: ThermostatConfig,
    state: Arc<Mutex<ControllerState>>,
    stop_sender: watch::Sender<bool>,
    stop_receiver: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<H: Hal + 'static> Controller<H> {
    pub fn new(hal: Arc<H>, cfg: ThermostatConfig) -> Controller<H> {
        let (stop_sender, stop_receiver) = watch::channel(false);
        let state = ControllerState {
            mode: OperatingMode::default(),
            set_point: cfg.default_setpoint,
            ticks: 0,
            alt: 0,
        };
        Controller {
            hal,
            cfg,
            state: Arc::new(Mutex::new(state)),
            stop_sender,
            stop_receiver,
            task: Mutex::new(None),
        }
    }

    // ---------- Button handlers ----------

    /// Advance the operating mode: off -> heat -> cool -> off.
    pub fn cycle_mode(&self) {
        let mode = {
            let mut state = lock_state(&self.state);
            state.mode = state.mode.next();
            state.mode
        };
        debug!("cycled operating mode to {}", mode);
        self.refresh_indicators();
    }

    /// Raise the setpoint by one degree, saturating at the configured
    /// maximum.
    pub fn increase_setpoint(&self) {
        let set_point = {
            let mut state = lock_state(&self.state);
            state.set_point = (state.set_point + 1).min(self.cfg.max_setpoint);
            state.set_point
        };
        debug!("setpoint raised to {}", set_point);
        self.refresh_indicators();
    }

    /// Lower the setpoint by one degree, saturating at the configured
    /// minimum.
    pub fn decrease_setpoint(&self) {
        let set_point = {
            let mut state = lock_state(&self.state);
            state.set_point = (state.set_point - 1).max(self.cfg.min_setpoint);
            state.set_point
        };
        debug!("setpoint lowered to {}", set_point);
        self.refresh_indicators();
    }

    pub fn current_mode(&self) -> OperatingMode {
        lock_state(&self.state).mode
    }

    pub fn current_setpoint(&self) -> i32 {
        lock_state(&self.state).set_point
    }

    /// Re-run the indicator policy against a fresh sensor reading and apply
    /// the result. Called after every mode or setpoint change and
    /// periodically from the background loop; any hardware failure is logged
    /// and suppressed.
    pub fn refresh_indicators(&self) {
        refresh_indicators(self.hal.as_ref(), &self.cfg, &self.state);
    }

    // ---------- Lifecycle ----------

    /// Spawn the periodic display/telemetry loop. At most one loop runs per
    /// controller; a second call before `stop` logs a warning and does
    /// nothing. Starting again after `stop` is not supported: the stop
    /// signal is latched, so such a loop exits immediately.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            warn!("controller already started, ignoring start request");
            return;
        }
        let hal = Arc::clone(&self.hal);
        let cfg = self.cfg.clone();
        let state = Arc::clone(&self.state);
        let stop = self.stop_receiver.clone();
        *task = Some(tokio::spawn(display_loop(hal, cfg, state, stop)));
    }

    /// Signal the background loop to stop, wait for it up to a bounded
    /// timeout, then release the hardware. Never fails; safe to call before
    /// `start` and safe to call more than once (the backend's `close` is
    /// idempotent).
    pub async fn stop(&self) {
        info!("stopping controller");
        // Latched; observed by the loop at its interruptible wait.
        let _ = self.stop_sender.send(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = task {
            match timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("display loop task failed: {}", e),
                Err(_) => warn!(
                    "display loop did not stop within {:?}, releasing hardware anyway",
                    STOP_TIMEOUT
                ),
            }
        }
        self.hal.close();
    }
}

fn lock_state(state: &Mutex<ControllerState>) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Uniform treatment of fallible hardware calls: log and carry on. No error
/// from the hardware boundary may cross into the state-machine layer.
fn log_and_continue(op: &str, res: Result<(), HalError>) {
    if let Err(e) = res {
        warn!("{} failed: {}", op, e);
    }
}

/// Read the sensor, falling back to the setpoint when the read fails. The
/// setpoint is a conservative substitute that keeps the indicator policy and
/// display fed with a usable number whatever the sensor's health.
fn safe_temp_f<H: Hal>(hal: &H, fallback: i32) -> f64 {
    match hal.read_temp_f() {
        Ok(temp) => temp,
        Err(e) => {
            warn!("sensor read failed, substituting setpoint: {}", e);
            f64::from(fallback)
        }
    }
}

fn refresh_indicators<H: Hal>(hal: &H, cfg: &ThermostatConfig, state: &Mutex<ControllerState>) {
    let (mode, set_point) = {
        let state = lock_state(state);
        (state.mode, state.set_point)
    };
    let temp = safe_temp_f(hal, set_point);
    let action = indicator_action(mode, temp, set_point);
    trace!(
        "indicators: mode {}, temp {}, setpoint {} -> {:?}",
        mode,
        temp,
        set_point,
        action
    );
    let res = match action {
        IndicatorAction::AllOff => hal.leds_off(),
        IndicatorAction::RedSolid => hal.red_solid(),
        IndicatorAction::RedBlink => {
            hal.red_blink(cfg.blink_on, cfg.blink_off, cfg.fade_in, cfg.fade_out)
        }
        IndicatorAction::BlueSolid => hal.blue_solid(),
        IndicatorAction::BlueBlink => {
            hal.blue_blink(cfg.blink_on, cfg.blink_off, cfg.fade_in, cfg.fade_out)
        }
    };
    log_and_continue("indicator update", res);
}

/// Telemetry payload: `"<mode>, <temperature to 2 decimals>, <setpoint>"`.
fn status_string(mode: OperatingMode, temp_f: f64, set_point: i32) -> String {
    format!("{}, {:.2}, {}", mode, temp_f, set_point)
}

/// Second display line for the given alternation index: the temperature for
/// the first half of the window, mode and setpoint for the rest.
fn status_line(alt: u8, mode: OperatingMode, set_point: i32, temp_f: f64) -> String {
    if alt < ALT_WINDOW / 2 {
        format!("Temp: {:.1}", temp_f)
    } else {
        format!("{} Set:{}", mode, set_point)
    }
}

async fn display_loop<H: Hal>(
    hal: Arc<H>,
    cfg: ThermostatConfig,
    state: Arc<Mutex<ControllerState>>,
    mut stop: watch::Receiver<bool>,
) {
    info!("display loop starting");
    while !*stop.borrow() {
        let (mode, set_point, ticks, alt) = {
            let state = lock_state(&state);
            (state.mode, state.set_point, state.ticks, state.alt)
        };

        let line1 = chrono::Local::now().format("%m/%d %H:%M:%S").to_string();
        let line2 = status_line(alt, mode, set_point, safe_temp_f(hal.as_ref(), set_point));
        log_and_continue("display update", hal.display(&line1, &line2));

        if ticks % cfg.light_refresh_every_ticks == 0 {
            refresh_indicators(hal.as_ref(), &cfg, &state);
        }

        if ticks % cfg.serial_send_interval_ticks == 0 {
            let temp = safe_temp_f(hal.as_ref(), set_point);
            log_and_continue(
                "serial send",
                hal.serial_send(&status_string(mode, temp, set_point)),
            );
        }

        {
            let mut state = lock_state(&state);
            state.ticks = state.ticks.wrapping_add(1);
            state.alt = (state.alt + 1) % ALT_WINDOW;
        }

        tokio::select! {
            _ = sleep(cfg.display_refresh) => {}
            res = stop.changed() => {
                if res.is_err() {
                    // Controller dropped without stopping; nothing left to
                    // observe the loop, so exit.
                    break;
                }
            }
        }
    }
    info!("display loop stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{LedState, SimHal};

    fn test_config() -> ThermostatConfig {
        ThermostatConfig {
            display_refresh: Duration::from_millis(10),
            ..ThermostatConfig::default()
        }
    }

    fn controller(sim: &Arc<SimHal>) -> Controller<SimHal> {
        Controller::new(Arc::clone(sim), test_config())
    }

    fn red_blink(cfg: &ThermostatConfig) -> LedState {
        LedState::RedBlink {
            on: cfg.blink_on,
            off: cfg.blink_off,
            fade_in: cfg.fade_in,
            fade_out: cfg.fade_out,
        }
    }

    fn blue_blink(cfg: &ThermostatConfig) -> LedState {
        LedState::BlueBlink {
            on: cfg.blink_on,
            off: cfg.blink_off,
            fade_in: cfg.fade_in,
            fade_out: cfg.fade_out,
        }
    }

    #[test]
    fn mode_follows_fixed_cycle() {
        let sim = Arc::new(SimHal::default());
        let ctrl = controller(&sim);
        assert_eq!(ctrl.current_mode(), OperatingMode::Off);
        ctrl.cycle_mode();
        assert_eq!(ctrl.current_mode(), OperatingMode::Heat);
        ctrl.cycle_mode();
        assert_eq!(ctrl.current_mode(), OperatingMode::Cool);
        ctrl.cycle_mode();
        assert_eq!(ctrl.current_mode(), OperatingMode::Off);

        // Any multiple of three cycles lands back where it started.
        for _ in 0..9 {
            ctrl.cycle_mode();
        }
        assert_eq!(ctrl.current_mode(), OperatingMode::Off);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Heat".parse::<OperatingMode>().unwrap(), OperatingMode::Heat);
        assert_eq!("COOL".parse::<OperatingMode>().unwrap(), OperatingMode::Cool);
        assert!("auto".parse::<OperatingMode>().is_err());
    }

    #[test]
    fn setpoint_saturates_at_bounds() {
        let sim = Arc::new(SimHal::default());
        let ctrl = controller(&sim);
        let cfg = test_config();

        for _ in 0..100 {
            ctrl.increase_setpoint();
            assert!(ctrl.current_setpoint() <= cfg.max_setpoint);
        }
        assert_eq!(ctrl.current_setpoint(), cfg.max_setpoint);
        ctrl.increase_setpoint();
        assert_eq!(ctrl.current_setpoint(), cfg.max_setpoint);

        for _ in 0..100 {
            ctrl.decrease_setpoint();
            assert!(ctrl.current_setpoint() >= cfg.min_setpoint);
        }
        assert_eq!(ctrl.current_setpoint(), cfg.min_setpoint);
        ctrl.decrease_setpoint();
        assert_eq!(ctrl.current_setpoint(), cfg.min_setpoint);
    }

    #[test]
    fn indicator_policy_is_pure_and_floors() {
        assert_eq!(
            indicator_action(OperatingMode::Off, 100.0, 72),
            IndicatorAction::AllOff
        );
        assert_eq!(
            indicator_action(OperatingMode::Heat, 68.0, 72),
            IndicatorAction::RedBlink
        );
        // 71.9 floors to 71, still below the setpoint.
        assert_eq!(
            indicator_action(OperatingMode::Heat, 71.9, 72),
            IndicatorAction::RedBlink
        );
        // 72.6 floors to 72, which satisfies heat.
        assert_eq!(
            indicator_action(OperatingMode::Heat, 72.6, 72),
            IndicatorAction::RedSolid
        );
        // 72.4 floors to 72, which satisfies cool.
        assert_eq!(
            indicator_action(OperatingMode::Cool, 72.4, 72),
            IndicatorAction::BlueSolid
        );
        assert_eq!(
            indicator_action(OperatingMode::Cool, 73.0, 72),
            IndicatorAction::BlueBlink
        );

        // Identical inputs, identical output, regardless of call history.
        for _ in 0..3 {
            assert_eq!(
                indicator_action(OperatingMode::Heat, 71.9, 72),
                IndicatorAction::RedBlink
            );
        }
    }

    #[test]
    fn buttons_drive_indicators_end_to_end() {
        let sim = Arc::new(SimHal::default());
        sim.set_temperature(68.0);
        let ctrl = controller(&sim);
        let cfg = test_config();

        // 68 below the default setpoint of 72: heating demand.
        ctrl.cycle_mode();
        assert_eq!(ctrl.current_mode(), OperatingMode::Heat);
        assert_eq!(sim.led_state(), red_blink(&cfg));

        // Raising the setpoint to 74 keeps the demand active.
        ctrl.increase_setpoint();
        ctrl.increase_setpoint();
        assert_eq!(ctrl.current_setpoint(), 74);
        assert_eq!(sim.led_state(), red_blink(&cfg));

        // 75 satisfies heat once a refresh runs.
        sim.set_temperature(75.0);
        ctrl.refresh_indicators();
        assert_eq!(sim.led_state(), LedState::RedSolid);

        // 75 above setpoint 74 in cool mode: cooling demand.
        ctrl.cycle_mode();
        assert_eq!(ctrl.current_mode(), OperatingMode::Cool);
        assert_eq!(sim.led_state(), blue_blink(&cfg));

        // Off turns everything off.
        ctrl.cycle_mode();
        assert_eq!(sim.led_state(), LedState::Off);
    }

    #[test]
    fn telemetry_format_matches_contract() {
        assert_eq!(
            status_string(OperatingMode::Heat, 69.96, 72),
            "heat, 69.96, 72"
        );
        assert_eq!(status_string(OperatingMode::Off, 72.0, 72), "off, 72.00, 72");
    }

    #[test]
    fn display_line_alternates_over_window() {
        for alt in 0..5 {
            assert_eq!(
                status_line(alt, OperatingMode::Heat, 72, 68.55),
                "Temp: 68.5"
            );
        }
        for alt in 5..10 {
            assert_eq!(
                status_line(alt, OperatingMode::Heat, 72, 68.55),
                "heat Set:72"
            );
        }
    }

    #[tokio::test]
    async fn failing_sensor_falls_back_to_setpoint() {
        let sim = Arc::new(SimHal::default());
        sim.fail_sensor(true);
        let ctrl = controller(&sim);
        ctrl.start();
        sleep(Duration::from_millis(50)).await;
        // Snapshot before stop; close() clears the display.
        let (_, line2) = sim.last_display();
        let serial = sim.serial_out();
        ctrl.stop().await;

        // Tick zero sends telemetry; the temperature slot must carry the
        // setpoint, not an error.
        assert!(!serial.is_empty());
        assert_eq!(serial[0], "off, 72.00, 72");
        assert_eq!(line2, "Temp: 72.0");
    }

    #[tokio::test]
    async fn display_failures_do_not_stop_the_loop() {
        let sim = Arc::new(SimHal::default());
        sim.fail_display(true);
        let ctrl = controller(&sim);
        ctrl.start();
        sleep(Duration::from_millis(50)).await;
        ctrl.stop().await;

        // Telemetry kept flowing even though every display write failed.
        assert!(!sim.serial_out().is_empty());
    }

    #[tokio::test]
    async fn stop_before_start_and_double_stop_are_safe() {
        let sim = Arc::new(SimHal::default());
        let ctrl = controller(&sim);
        ctrl.stop().await;
        assert_eq!(sim.close_count(), 1);
        ctrl.stop().await;
        assert_eq!(sim.close_count(), 2);
    }

    #[tokio::test]
    async fn start_twice_spawns_a_single_loop() {
        let sim = Arc::new(SimHal::default());
        let ctrl = controller(&sim);
        ctrl.start();
        ctrl.start();
        sleep(Duration::from_millis(25)).await;
        ctrl.stop().await;

        // With the 30-tick telemetry cadence only tick zero sends inside
        // 25 ms; a duplicate loop would have sent twice.
        let sent = sim.serial_out().len();
        assert_eq!(sent, 1);

        // And nothing keeps running after stop.
        sleep(Duration::from_millis(30)).await;
        assert_eq!(sim.serial_out().len(), sent);
        assert_eq!(sim.close_count(), 1);
    }
}
