use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lhylink_controller::{lock_model, BoardEmulator, SimulatedBoardConfig};

use crate::cmd::EmulateArgs;
use crate::exit::{controller_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_emulator_report, EmulatorReport, OutputFormat};

pub fn run(args: EmulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = SimulatedBoardConfig {
        chip_version: args.chip_version,
        busy_polls: args.busy_polls,
        work_per_packet: args.work_per_packet,
        work_per_poll: args.work_per_poll,
        refuse_opens: 0,
    };
    let emulator =
        BoardEmulator::bind(&args.path, config).map_err(|err| controller_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    tracing::info!(path = %args.path.display(), "emulating board");
    emulator
        .serve(&running)
        .map_err(|err| controller_error("emulator failed", err))?;

    let shared = emulator.model();
    let model = lock_model(&shared);
    let report = EmulatorReport {
        path: args.path.display().to_string(),
        frames_accepted: model.accepted().len(),
        frames_rejected: model.rejected(),
        status_polls: model.status_polls(),
    };
    print_emulator_report(&report, format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
