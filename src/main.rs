extern crate pretty_env_logger;
#[macro_use]
extern crate log;

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use homestat::config::ThermostatConfig;
use homestat::controller::Controller;
use homestat::hal::sim::SimHal;
use structopt::StructOpt;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::sleep;

/// Run the thermostat against the simulated hardware backend. Stdin lines
/// stand in for the front-panel buttons: `m` cycles the operating mode,
/// `+` and `-` adjust the setpoint.
#[derive(StructOpt, Debug)]
struct Opt {
    /// Initial setpoint in degrees Fahrenheit
    #[structopt(short, long)]
    setpoint: Option<i32>,

    /// Simulated temperature readings, cycled indefinitely
    #[structopt(short, long)]
    temps: Vec<f64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[structopt(short, long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    pretty_env_logger::init();
    color_eyre::install()?;

    let opts = Opt::from_args();
    debug!("opts: {:?}", opts);

    let mut cfg = ThermostatConfig::default();
    if let Some(setpoint) = opts.setpoint {
        cfg.default_setpoint = setpoint.clamp(cfg.min_setpoint, cfg.max_setpoint);
    }

    let hal = Arc::new(SimHal::new(opts.temps));
    let controller = Arc::new(Controller::new(hal, cfg));
    controller.start();

    println!("Thermostat running: 'm' cycles mode, '+'/'-' adjust setpoint, Ctrl-C exits");

    // Buttons arrive from their own task, concurrent with the display loop.
    let input = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match line.trim() {
                    "m" => controller.cycle_mode(),
                    "+" => controller.increase_setpoint(),
                    "-" => controller.decrease_setpoint(),
                    "" => {}
                    other => warn!("unrecognized input: {:?}", other),
                }
            }
            debug!("input stream closed");
        })
    };

    match opts.duration {
        Some(secs) => {
            tokio::select! {
                _ = sleep(Duration::from_secs(secs)) => {}
                res = signal::ctrl_c() => {
                    res.wrap_err("could not listen for shutdown signal")?;
                }
            }
        }
        None => signal::ctrl_c()
            .await
            .wrap_err("could not listen for shutdown signal")?,
    }

    input.abort();
    controller.stop().await;
    println!(
        "Stopped at mode {}, setpoint {}",
        controller.current_mode(),
        controller.current_setpoint()
    );

    Ok(())
}
