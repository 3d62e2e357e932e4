//! `${name}` parameter substitution.
//!
//! Defaults come from the scenario's `<parameters>` block; the process
//! environment overrides them. Substitution repeats until a fixed point so
//! parameters may reference each other.

use anyhow::{bail, Result};
use regex::Regex;
use std::collections::HashMap;
use std::env;

use crate::scenario::Scenario;

/// Bound on substitution rounds; anything deeper is a definition cycle.
const MAX_ROUNDS: usize = 16;

pub struct Substitutor {
    defaults: HashMap<String, String>,
    pattern: Regex,
}

impl Substitutor {
    /// Collect `<parameters>` defaults from the scenario definition.
    pub fn new(scenario: &Scenario) -> Self {
        let mut defaults = HashMap::new();
        for params in scenario.definition().children_named("parameters") {
            for param in params.children_named("param") {
                let name = param.attr("name").unwrap_or_default();
                let value = param.attr("value").unwrap_or_default();
                defaults.insert(name.to_string(), value.to_string());
            }
        }

        Self {
            defaults,
            pattern: Regex::new(r"\$\{([^}]+)\}").expect("static pattern"),
        }
    }

    /// Resolve one parameter: environment wins over the declared default.
    fn lookup(&self, name: &str) -> Option<String> {
        env::var(name)
            .ok()
            .or_else(|| self.defaults.get(name).cloned())
    }

    /// Substitute every `${name}` occurrence in `value`, recursively until a
    /// fixed point. An undefined parameter is fatal; `context` names the
    /// attribute for the diagnostic.
    pub fn substitute(&self, value: &str, context: &str) -> Result<String> {
        let mut current = value.to_string();

        for _ in 0..MAX_ROUNDS {
            if !self.pattern.is_match(&current) {
                return Ok(current);
            }

            let mut next = String::with_capacity(current.len());
            let mut last = 0;
            for caps in self.pattern.captures_iter(&current) {
                let whole = caps.get(0).expect("match");
                let name = &caps[1];
                let replacement = self.lookup(name).ok_or_else(|| {
                    anyhow::anyhow!("Undefined parameter '${{{name}}}' in {context}")
                })?;
                next.push_str(&current[last..whole.start()]);
                next.push_str(&replacement);
                last = whole.end();
            }
            next.push_str(&current[last..]);
            current = next;
        }

        bail!("Parameter substitution in {context} does not converge: {value}");
    }
}
