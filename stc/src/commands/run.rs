//! `run` command: execute a scenario, optionally restricted to a range of
//! steps.

use anyhow::{Context, Result};
use colored::Colorize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::report::{self, ColorMode, TerminalReporter};
use crate::compiler;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::flow::Status;
use crate::scenario::Scenario;

/// Compile and run the scenario. `from`/`to` restrict the run to the
/// matching subgraph; both empty means a full run.
pub fn execute(scenario_file: &Path, from: Vec<String>, to: Vec<String>) -> Result<i32> {
    let scenario = Scenario::load(scenario_file)?;
    let base_dir = scenario_file.parent().unwrap_or_else(|| Path::new("."));
    let compilation = compiler::compile(&scenario, base_dir)?;

    let config = CoordinatorConfig {
        halt_on_error: env::var("stcHaltOnError").as_deref() == Ok("true"),
        ..CoordinatorConfig::default()
    };

    let coordinator = Arc::new(Coordinator::new(
        compilation.flow,
        compilation.log_dir,
        config,
    ));
    coordinator.add_listener(Arc::new(TerminalReporter::from_env()));

    report::set_terminal_title(scenario.name());

    let abort_handle = Arc::clone(&coordinator);
    ctrlc::set_handler(move || abort_handle.abort())
        .context("Unable to install interrupt handler")?;

    if from.is_empty() && to.is_empty() {
        coordinator.reset()?;
    } else {
        coordinator.reset_range(&from, &to)?;
    }

    coordinator.start();
    let code = coordinator.wait_for();

    print_summary(&coordinator, scenario.name(), code);

    if code != 0 && env::var("stcDumpLogs").as_deref() == Ok("true") {
        dump_failed_logs(&coordinator);
    }

    Ok(code)
}

fn print_summary(coordinator: &Coordinator, name: &str, code: i32) {
    let duration = format_duration(coordinator.duration());
    let summary = if coordinator.aborted() {
        format!("Scenario '{name}' aborted after {duration}")
    } else if code == 0 {
        format!("Scenario '{name}' completed in {duration}")
    } else {
        format!("Scenario '{name}' failed after {duration}")
    };

    if ColorMode::from_env() == ColorMode::Plain {
        println!("{summary}");
    } else if code == 0 {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }
}

/// Dump the log file of every failed step to standard output
/// (`stcDumpLogs=true`).
fn dump_failed_logs(coordinator: &Coordinator) {
    for step in coordinator.steps() {
        if step.is_group() || coordinator.status_of(&step.name) != Some(Status::Failed) {
            continue;
        }

        let log_path = coordinator.log_dir().join(format!("{}.log", step.name));
        println!("--- {} ---", log_path.display());
        match fs::read_to_string(&log_path) {
            Ok(contents) => print!("{contents}"),
            Err(e) => println!("(no log: {e})"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 60.0 {
        format!("{}m {}s", (secs / 60.0) as u64, (secs % 60.0) as u64)
    } else {
        format!("{secs:.1}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(2_300)), "2.3s");
        assert_eq!(format_duration(Duration::from_secs(75)), "1m 15s");
    }
}
