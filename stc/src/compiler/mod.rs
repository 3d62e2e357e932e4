//! Scenario elaboration.
//!
//! The compiler turns a validated scenario document into an immutable
//! [`ProcessFlow`]: parameters are substituted, imports expanded under their
//! namespace, steps and groups instantiated, dependencies wired (with group
//! requires inherited by members) and the result checked for cycles.

mod imports;
mod params;

#[cfg(test)]
mod tests;

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

use crate::flow::{Dependency, ProcessFlow, Step};
use crate::scenario::{Scenario, ScenarioElement};

pub use params::Substitutor;

/// Base directory for per-scenario log directories when `stcLogDir` is not
/// set.
const DEFAULT_LOG_BASE: &str = "/tmp/stc";

/// Result of a successful compilation.
#[derive(Debug)]
pub struct Compilation {
    pub flow: ProcessFlow,
    /// Where the coordinator will keep `<stepName>.log` files and the status
    /// record. Creation is the coordinator's job.
    pub log_dir: PathBuf,
}

/// Load, validate and compile a scenario file.
pub fn compile_file(path: &Path) -> Result<Compilation> {
    let scenario = Scenario::load(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    compile(&scenario, base_dir)
}

/// Compile a loaded scenario. `base_dir` anchors relative import paths.
pub fn compile(scenario: &Scenario, base_dir: &Path) -> Result<Compilation> {
    let mut defs = Definitions::default();
    let mut import_stack = Vec::new();
    collect(scenario, base_dir, None, &mut import_stack, &mut defs)
        .with_context(|| format!("Unable to compile scenario '{}'", scenario.name()))?;

    let flow = wire(defs)
        .with_context(|| format!("Unable to compile scenario '{}'", scenario.name()))?;

    Ok(Compilation {
        flow,
        log_dir: log_dir_for(scenario.name()),
    })
}

/// Log directory for a scenario name: `${stcLogDir:-/tmp/stc}/<name>`.
pub fn log_dir_for(scenario_name: &str) -> PathBuf {
    let base = env::var("stcLogDir").unwrap_or_else(|_| DEFAULT_LOG_BASE.to_string());
    Path::new(&base).join(scenario_name)
}

/// Everything gathered while walking scenario documents, before wiring.
#[derive(Default)]
struct Definitions {
    /// Steps and groups in declaration order.
    steps: Vec<Step>,
    /// Raw (already namespaced) `requires` entries per node.
    requires: Vec<(String, Vec<String>)>,
    /// Post-hoc `<dependency>` entries: (step, requires entry).
    extra: Vec<(String, String)>,
}

/// Walk one scenario document, accumulating definitions. `prefix` is the
/// composed namespace of the enclosing imports.
fn collect(
    scenario: &Scenario,
    base_dir: &Path,
    prefix: Option<&str>,
    import_stack: &mut Vec<PathBuf>,
    defs: &mut Definitions,
) -> Result<()> {
    let subst = Substitutor::new(scenario);

    for elem in &scenario.definition().children {
        match elem.tag.as_str() {
            "step" => {
                collect_step(elem, &subst, prefix, None, defs)?;
            }
            "group" => {
                collect_group(elem, &subst, prefix, None, defs)?;
            }
            "import" => {
                imports::expand(elem, &subst, base_dir, prefix, import_stack, defs)?;
            }
            "dependency" => {
                collect_dependency(elem, &subst, prefix, defs)?;
            }
            "parameters" => {} // consumed by the substitutor
            other => bail!("Unexpected element <{other}>"),
        }
    }

    Ok(())
}

fn collect_step(
    elem: &ScenarioElement,
    subst: &Substitutor,
    prefix: Option<&str>,
    parent: Option<&str>,
    defs: &mut Definitions,
) -> Result<String> {
    let raw_name = subst.substitute(elem.attr("name").unwrap_or_default(), "step name")?;
    let name = qualify(prefix, &raw_name);
    let context = format!("step '{name}'");

    let command = subst.substitute(elem.attr("exec").unwrap_or_default(), &context)?;

    let mut step = Step::atomic(name.clone(), command);
    step.group = parent.map(String::from);

    if let Some(env_attr) = elem.attr("env") {
        step.env = parse_env(&subst.substitute(env_attr, &context)?, &name)?;
    }
    if let Some(cwd) = elem.attr("cwd") {
        step.cwd = Some(PathBuf::from(subst.substitute(cwd, &context)?));
    }
    if let Some(cond) = elem.attr("if") {
        step.condition = Some(subst.substitute(cond, &context)?);
    }
    if let Some(unless) = elem.attr("unless") {
        step.unless = Some(subst.substitute(unless, &context)?);
    }
    if let Some(delay) = elem.attr("delay") {
        let delay = subst.substitute(delay, &context)?;
        step.delay = delay
            .parse()
            .with_context(|| format!("Invalid delay '{delay}' on {context}"))?;
    }

    let requires = requires_entries(elem, subst, prefix, &context)?;

    defs.steps.push(step);
    defs.requires.push((name.clone(), requires));
    Ok(name)
}

fn collect_group(
    elem: &ScenarioElement,
    subst: &Substitutor,
    prefix: Option<&str>,
    parent: Option<&str>,
    defs: &mut Definitions,
) -> Result<String> {
    let raw_name = subst.substitute(elem.attr("name").unwrap_or_default(), "group name")?;
    let name = qualify(prefix, &raw_name);
    let context = format!("group '{name}'");

    let requires = requires_entries(elem, subst, prefix, &context)?;

    let mut members = Vec::new();
    for child in &elem.children {
        let member = match child.tag.as_str() {
            "step" => collect_step(child, subst, prefix, Some(&name), defs)?,
            "group" => collect_group(child, subst, prefix, Some(&name), defs)?,
            other => bail!("Unexpected element <{other}> in {context}"),
        };
        members.push(member);
    }

    let mut group = Step::composite(name.clone(), members);
    group.group = parent.map(String::from);

    defs.steps.push(group);
    defs.requires.push((name.clone(), requires));
    Ok(name)
}

fn collect_dependency(
    elem: &ScenarioElement,
    subst: &Substitutor,
    prefix: Option<&str>,
    defs: &mut Definitions,
) -> Result<()> {
    let step = qualify(
        prefix,
        &subst.substitute(elem.attr("step").unwrap_or_default(), "dependency step")?,
    );
    let requires = subst.substitute(
        elem.attr("requires").unwrap_or_default(),
        "dependency requires",
    )?;
    for entry in split_list(&requires) {
        defs.extra.push((step.clone(), qualify_entry(prefix, &entry)));
    }
    Ok(())
}

/// Parse and namespace the `requires` attribute of a step or group element.
fn requires_entries(
    elem: &ScenarioElement,
    subst: &Substitutor,
    prefix: Option<&str>,
    context: &str,
) -> Result<Vec<String>> {
    let Some(attr) = elem.attr("requires") else {
        return Ok(Vec::new());
    };
    let substituted = subst.substitute(attr, context)?;
    Ok(split_list(&substituted)
        .into_iter()
        .map(|entry| qualify_entry(prefix, &entry))
        .collect())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Apply the namespace prefix to a plain name.
fn qualify(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) => format!("{p}.{name}"),
        None => name.to_string(),
    }
}

/// Apply the namespace prefix to a `requires` entry, keeping a leading `!`
/// (soft marker) in place.
fn qualify_entry(prefix: Option<&str>, entry: &str) -> String {
    match entry.strip_prefix('!') {
        Some(name) => format!("!{}", qualify(prefix, name.trim())),
        None => qualify(prefix, entry),
    }
}

/// `env="K=V,K=V"` attribute parsing.
fn parse_env(attr: &str, step: &str) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();
    for pair in split_list(attr) {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid env entry '{pair}' on step '{step}' (expected K=V)");
        };
        vars.push((key.trim().to_string(), value.to_string()));
    }
    Ok(vars)
}

/// Wire dependency edges (own requires, inherited group requires, post-hoc
/// dependencies) and build the flow.
fn wire(defs: Definitions) -> Result<ProcessFlow> {
    let mut entries: HashMap<String, Vec<String>> = HashMap::new();
    for (name, list) in defs.requires {
        entries.entry(name).or_default().extend(list);
    }
    for (name, entry) in defs.extra {
        if !defs.steps.iter().any(|s| s.name == name) {
            bail!("Dependency references unknown step '{name}'");
        }
        entries.entry(name).or_default().push(entry);
    }

    let parents: HashMap<&str, &str> = defs
        .steps
        .iter()
        .filter_map(|s| s.group.as_deref().map(|g| (s.name.as_str(), g)))
        .collect();

    let mut edges = Vec::new();
    let mut seen = HashSet::new();
    for step in &defs.steps {
        // Own requires plus every enclosing group's requires.
        let mut node = Some(step.name.as_str());
        while let Some(current) = node {
            if let Some(list) = entries.get(current) {
                for entry in list {
                    let dep = Dependency::parse(&step.name, entry);
                    if is_ancestor(&parents, &step.name, &dep.to) {
                        bail!(
                            "Step '{}' requires its enclosing group '{}'",
                            step.name,
                            dep.to
                        );
                    }
                    if seen.insert((dep.from.clone(), dep.to.clone(), dep.soft)) {
                        edges.push(dep);
                    }
                }
            }
            node = parents.get(current).copied();
        }
    }

    ProcessFlow::new(defs.steps, edges)
}

/// Whether `ancestor` encloses `name` in the group forest.
fn is_ancestor(parents: &HashMap<&str, &str>, name: &str, ancestor: &str) -> bool {
    let mut node = parents.get(name).copied();
    while let Some(current) = node {
        if current == ancestor {
            return true;
        }
        node = parents.get(current).copied();
    }
    false
}
