//! `<import>` expansion.
//!
//! An import loads another scenario file (relative to the importing
//! document), re-roots its names under the composed namespace prefix and
//! applies any dependency overrides declared on the import element. The
//! import stack catches file cycles.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::scenario::{Scenario, ScenarioElement};

use super::{Definitions, Substitutor};

pub(super) fn expand(
    elem: &ScenarioElement,
    subst: &Substitutor,
    base_dir: &Path,
    prefix: Option<&str>,
    import_stack: &mut Vec<std::path::PathBuf>,
    defs: &mut Definitions,
) -> Result<()> {
    let file = subst.substitute(elem.attr("file").unwrap_or_default(), "import file")?;
    let namespace = match elem.attr("namespace") {
        Some(ns) => Some(subst.substitute(ns, "import namespace")?),
        None => None,
    };

    let path = base_dir.join(&file);
    let canonical = fs::canonicalize(&path)
        .with_context(|| format!("Unable to resolve import '{}'", path.display()))?;

    if let Some(pos) = import_stack.iter().position(|p| p == &canonical) {
        let mut chain: Vec<String> = import_stack[pos..]
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        chain.push(canonical.display().to_string());
        bail!("Import cycle: {}", chain.join(" -> "));
    }

    let child_prefix = compose(prefix, namespace.as_deref());
    let sub_scenario = Scenario::load(&path)?;
    let sub_dir = path.parent().unwrap_or_else(|| Path::new("."));

    import_stack.push(canonical);
    let result = super::collect(
        &sub_scenario,
        sub_dir,
        child_prefix.as_deref(),
        import_stack,
        defs,
    );
    import_stack.pop();
    result.with_context(|| format!("Unable to expand import '{file}'"))?;

    // Overrides are written in the importing document's own namespace.
    for dep in elem.children_named("dependency") {
        super::collect_dependency(dep, subst, prefix, defs)?;
    }

    Ok(())
}

/// Compose the enclosing prefix with this import's namespace.
fn compose(prefix: Option<&str>, namespace: Option<&str>) -> Option<String> {
    match (prefix, namespace) {
        (Some(p), Some(n)) => Some(format!("{p}.{n}")),
        (Some(p), None) => Some(p.to_string()),
        (None, Some(n)) => Some(n.to_string()),
        (None, None) => None,
    }
}
