use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lhylink_controller::{
    select_transport, ChannelNotifier, Controller, ControllerConfig, ControllerEvent,
};
use lhylink_frame::LINE_END;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{controller_error, io_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_event, print_send_report, OutputFormat, SendReport};

const POLL: Duration = Duration::from_millis(50);

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut payload = resolve_payload(&args)?;
    if payload.last().is_some_and(|&b| b != LINE_END) {
        payload.push(LINE_END);
    }
    if args.wait {
        payload.extend_from_slice(b"-\n");
    }

    let transport = select_transport(&args.transport)
        .map_err(|err| controller_error("transport selection failed", err))?;
    let transport_name = transport.transport_name().to_string();

    let config = ControllerConfig {
        max_open_attempts: args.max_open_attempts,
        ..ControllerConfig::default()
    };
    let (notifier, events) = ChannelNotifier::new();
    let controller = Controller::with_config(transport, config, Arc::new(notifier));

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if args.priority {
        controller.enqueue_priority(&payload);
    } else {
        controller.enqueue(&payload);
    }
    controller
        .start()
        .map_err(|err| controller_error("start failed", err))?;

    let deadline = Instant::now() + timeout;
    let mut interrupted = false;
    let drained = loop {
        if controller.wait_idle(POLL) {
            break true;
        }
        flush_events(&events, args.events, format);
        if !running.load(Ordering::SeqCst) {
            tracing::warn!("interrupted, discarding queued data");
            interrupted = true;
            controller.abort();
            break false;
        }
        if !controller.is_running() || Instant::now() >= deadline {
            break false;
        }
    };

    let pending = controller.pending_len();
    let stopped = controller.stop();
    flush_events(&events, args.events, format);
    stopped.map_err(|err| controller_error("send failed", err))?;

    let report = SendReport {
        transport: transport_name,
        bytes_queued: payload.len(),
        bytes_pending: pending,
        drained,
        state: controller.state(),
        stats: controller.stats(),
    };
    print_send_report(&report, format);

    if interrupted {
        return Err(CliError::new(INTERNAL, "interrupted"));
    }
    if !drained {
        return Err(CliError::new(
            TIMEOUT,
            format!("{pending} bytes still pending after {timeout:?}"),
        ));
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    match &args.file {
        Some(path) if path == Path::new("-") => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|err| io_error("failed reading stdin", err))?;
            Ok(buf)
        }
        Some(path) => fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err)),
        None => Ok(Vec::new()),
    }
}

fn flush_events(events: &Receiver<ControllerEvent>, print: bool, format: OutputFormat) {
    for event in events.try_iter() {
        if print {
            print_event(&event, format);
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
