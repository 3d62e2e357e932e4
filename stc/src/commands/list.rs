//! `list` and `listFailed`: replay the persisted status record.

use anyhow::Result;
use std::path::Path;

use crate::commands::report::TerminalReporter;
use crate::compiler;
use crate::coordinator::StatusRecord;
use crate::flow::Status;
use crate::scenario::Scenario;

pub fn execute(scenario_file: &Path, failed_only: bool) -> Result<i32> {
    let scenario = Scenario::load(scenario_file)?;
    let log_dir = compiler::log_dir_for(scenario.name());
    let events = StatusRecord::load(&log_dir)?;

    let reporter = TerminalReporter::from_env();
    for event in events {
        if failed_only && event.status != Status::Failed {
            continue;
        }
        reporter.print_event(event.time, &event.step, event.status);
    }

    Ok(0)
}
