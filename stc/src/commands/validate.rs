//! `validate`: compile the scenario without executing anything.

use anyhow::Result;
use std::path::Path;

use crate::compiler;
use crate::scenario::Scenario;

pub fn execute(scenario_file: &Path) -> Result<i32> {
    let scenario = Scenario::load(scenario_file)?;
    let base_dir = scenario_file.parent().unwrap_or_else(|| Path::new("."));
    let compilation = compiler::compile(&scenario, base_dir)?;

    let flow = &compilation.flow;
    let steps = flow.steps().iter().filter(|s| !s.is_group()).count();
    let groups = flow.steps().len() - steps;
    let dependencies: usize = flow
        .steps()
        .iter()
        .map(|s| flow.prerequisites(&s.name).len())
        .sum();

    println!(
        "Scenario '{}' is valid: {steps} steps, {groups} groups, {dependencies} dependencies",
        scenario.name()
    );
    println!("Log directory: {}", compilation.log_dir.display());
    Ok(0)
}
