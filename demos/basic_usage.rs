/// Basic usage example: calibrate on a simulated arm, then track a set of curls
use rehab_band::presenter::HistoryPresenter;
use rehab_band::simulation::{CurlSimulator, ImmediatePacer, RecordingActuator};
use rehab_band::{ControlConfig, ControlLoop, Devices, StatusSnapshot};

fn main() -> Result<(), rehab_band::ControlError> {
    println!("=== Rehab Band Control: Basic Example ===\n");

    // Unsmoothed readings so each curl reaches both ends of the band
    let mut config = ControlConfig::default();
    config.filter.window_size = 1;

    // Simulated arm: one curl every twelve reads, with a sensor hiccup mid-set
    let sensor = CurlSimulator::default().with_dropouts([30, 31]);
    let actuator = RecordingActuator::new();
    let commands = actuator.log();
    let history = HistoryPresenter::default();
    let plot = history.view();

    let devices = Devices::new(sensor, actuator)
        .with_presenter(history)
        .with_pacer(ImmediatePacer::default());
    let mut control = ControlLoop::new(config, devices)?;

    let profile = control.start_calibration()?;
    println!(
        "Calibrated range: {:.1} .. {:.1} deg ({} samples)\n",
        profile.min_flexion(),
        profile.max_flexion(),
        profile.sample_count()
    );

    for _ in 0..48 {
        let snapshot = control.run_cycle();
        print_snapshot(&snapshot);
    }

    let last = control.shutdown();

    println!("\n=== Summary ===");
    println!("Reps completed: {}", last.reps.rep_count);
    if let Some(rep) = control.last_rep() {
        println!("Last rep took {}ms", rep.duration_ms());
    }
    println!("Actuator commands sent: {}", commands.command_count());
    println!("Snapshots kept for plotting: {}", plot.len());
    println!("Mean cycle time: {:.0}us", control.metrics().mean_cycle_us());
    Ok(())
}

fn print_snapshot(snapshot: &StatusSnapshot) {
    match snapshot.raw_angle {
        Some(angle) => println!(
            "[{:>3}] angle {:>6.1}  {:<12} reps {}  servo {:+.2} {:?} @ {:.2}",
            snapshot.cycle,
            angle,
            format!("{:?}", snapshot.verdict),
            snapshot.reps.rep_count,
            snapshot.command.servo_position,
            snapshot.command.motor_direction,
            snapshot.command.motor_speed,
        ),
        None => println!(
            "[{:>3}] no reading ({} in a row), holding last command",
            snapshot.cycle, snapshot.consecutive_failures
        ),
    }
}
