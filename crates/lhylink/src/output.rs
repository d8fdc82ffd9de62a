use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lhylink_controller::{ControllerEvent, ControllerState, ControllerStats};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Outcome of a `send` run.
#[derive(Serialize)]
pub struct SendReport {
    pub transport: String,
    pub bytes_queued: usize,
    pub bytes_pending: usize,
    pub drained: bool,
    pub state: ControllerState,
    pub stats: ControllerStats,
}

/// One status read.
#[derive(Serialize)]
pub struct StatusReport {
    pub transport: String,
    pub chip_version: u32,
    pub status: u8,
    pub status_name: String,
    pub finished: bool,
    pub raw: [u8; 6],
}

/// Summary printed when the emulator shuts down.
#[derive(Serialize)]
pub struct EmulatorReport {
    pub path: String,
    pub frames_accepted: usize,
    pub frames_rejected: usize,
    pub status_polls: usize,
}

fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(rows: Vec<(&str, String)>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["FIELD", "VALUE"]);
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    println!("{table}");
}

pub fn print_send_report(report: &SendReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(vec![
            ("transport", report.transport.clone()),
            ("queued", report.bytes_queued.to_string()),
            ("pending", report.bytes_pending.to_string()),
            ("drained", report.drained.to_string()),
            ("state", report.state.to_string()),
            ("packets", report.stats.packets_sent.to_string()),
            ("rejected", report.stats.rejected.to_string()),
            ("optimistic", report.stats.optimistic_accepts.to_string()),
            ("conn errors", report.stats.connection_errors.to_string()),
            ("refusals", report.stats.refusals.to_string()),
        ]),
        OutputFormat::Pretty => {
            println!(
                "sent {} packets via {} (rejected={} optimistic={} errors={} refusals={}) pending={} state={}",
                report.stats.packets_sent,
                report.transport,
                report.stats.rejected,
                report.stats.optimistic_accepts,
                report.stats.connection_errors,
                report.stats.refusals,
                report.bytes_pending,
                report.state
            );
        }
    }
}

pub fn print_status_report(report: &StatusReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(vec![
            ("transport", report.transport.clone()),
            ("chip version", format!("{:#06x}", report.chip_version)),
            ("status", format!("{} ({})", report.status, report.status_name)),
            ("finished", report.finished.to_string()),
            ("raw", hex(&report.raw)),
        ]),
        OutputFormat::Pretty => {
            println!(
                "{} status={} ({}) chip={:#06x} raw={}",
                report.transport,
                report.status,
                report.status_name,
                report.chip_version,
                hex(&report.raw)
            );
        }
    }
}

pub fn print_emulator_report(report: &EmulatorReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(vec![
            ("socket", report.path.clone()),
            ("accepted", report.frames_accepted.to_string()),
            ("rejected", report.frames_rejected.to_string()),
            ("status polls", report.status_polls.to_string()),
        ]),
        OutputFormat::Pretty => {
            println!(
                "{}: accepted={} rejected={} polls={}",
                report.path, report.frames_accepted, report.frames_rejected, report.status_polls
            );
        }
    }
}

/// Events stream as JSON lines regardless of format, except `pretty`.
pub fn print_event(event: &ControllerEvent, format: OutputFormat) {
    match format {
        OutputFormat::Pretty => println!("{event:?}"),
        OutputFormat::Json | OutputFormat::Table => match event.to_json_line() {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!(error = %err, "failed to render event"),
        },
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
