use lhylink_controller::select_transport;
use lhylink_frame::StatusCode;
use lhylink_transport::Transport;

use crate::cmd::StatusArgs;
use crate::exit::{controller_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_status_report, OutputFormat, StatusReport};

pub fn run(args: StatusArgs, format: OutputFormat) -> CliResult<i32> {
    let mut transport = select_transport(&args.transport)
        .map_err(|err| controller_error("transport selection failed", err))?;

    transport
        .open()
        .map_err(|err| transport_error("open failed", err))?;
    let chip_version = transport
        .get_chip_version()
        .map_err(|err| transport_error("chip version read failed", err));
    let status = transport
        .get_status()
        .map_err(|err| transport_error("status read failed", err));
    if let Err(err) = transport.close() {
        tracing::debug!(error = %err, "error while closing transport");
    }
    let (chip_version, raw) = (chip_version?, status?);

    let code = StatusCode::from_vector(&raw);
    let report = StatusReport {
        transport: transport.transport_name().to_string(),
        chip_version,
        status: code.byte(),
        status_name: code.to_string(),
        finished: code.is_finished(),
        raw,
    };
    print_status_report(&report, format);
    Ok(SUCCESS)
}
