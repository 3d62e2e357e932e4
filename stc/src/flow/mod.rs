//! Immutable process-flow DAG produced by the compiler.
//!
//! The flow owns the steps (declaration order preserved), the dependency
//! edges in both directions, and a stable topological order used by the
//! coordinator as its dispatch tie-break.

mod cycle;
mod step;


use anyhow::{bail, Context, Result};
use glob::Pattern;
use std::collections::{HashMap, HashSet, VecDeque};

pub use step::{Dependency, NodeKind, Status, Step};

/// Traversal direction for reachability queries.
#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Toward steps that depend on the current one.
    Downstream,
    /// Toward the current step's prerequisites.
    Upstream,
}

#[derive(Debug, Clone)]
pub struct ProcessFlow {
    /// All nodes, in scenario declaration order.
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    /// Edges keyed by the dependent step.
    requires: HashMap<String, Vec<Dependency>>,
    /// Edges keyed by the prerequisite step.
    dependents: HashMap<String, Vec<Dependency>>,
    /// Stable topological order: prerequisites first, declaration order as
    /// the tie-break.
    topo: Vec<String>,
}

impl ProcessFlow {
    /// Build a flow from steps and dependency edges.
    ///
    /// Fails on duplicate step names, on edges referencing unknown steps and
    /// on dependency cycles.
    pub fn new(steps: Vec<Step>, edges: Vec<Dependency>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.name.clone(), i).is_some() {
                bail!("Duplicate step name '{}'", step.name);
            }
        }

        let mut requires: HashMap<String, Vec<Dependency>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<Dependency>> = HashMap::new();
        for step in &steps {
            requires.entry(step.name.clone()).or_default();
            dependents.entry(step.name.clone()).or_default();
        }

        for edge in edges {
            if !index.contains_key(&edge.from) {
                bail!("Dependency references unknown step '{}'", edge.from);
            }
            if !index.contains_key(&edge.to) {
                bail!(
                    "Step '{}' requires unknown step or group '{}'",
                    edge.from,
                    edge.to
                );
            }
            requires
                .get_mut(&edge.from)
                .expect("initialized above")
                .push(edge.clone());
            dependents
                .get_mut(&edge.to)
                .expect("initialized above")
                .push(edge);
        }

        let all_edges: Vec<Dependency> = requires.values().flatten().cloned().collect();
        let topo = cycle::topological_order(&steps, &all_edges)?;

        Ok(Self {
            steps,
            index,
            requires,
            dependents,
            topo,
        })
    }

    /// All nodes in declaration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    /// Names in stable topological order (prerequisites first).
    pub fn topo_order(&self) -> &[String] {
        &self.topo
    }

    /// Edges from the named step to its prerequisites.
    pub fn prerequisites(&self, name: &str) -> &[Dependency] {
        self.requires.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edges from dependents pointing at the named step.
    pub fn dependents(&self, name: &str) -> &[Dependency] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps with no prerequisites.
    pub fn roots(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| self.prerequisites(&s.name).is_empty())
            .collect()
    }

    /// Steps no other step depends on.
    pub fn leaves(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| self.dependents(&s.name).is_empty())
            .collect()
    }

    /// Select the active subgraph for a range run.
    ///
    /// Returns the set of names downstream of any step matching `from`
    /// (inclusive) intersected with the set upstream of any step matching
    /// `to` (inclusive). Empty `from` selects the roots; empty `to` the
    /// leaves. Patterns are glob-style over step names. A matched or
    /// traversed group pulls in its members, since a group only completes
    /// through them.
    pub fn subgraph(&self, from: &[String], to: &[String]) -> Result<HashSet<String>> {
        let from_seed = self.match_patterns(from, || self.roots())?;
        let to_seed = self.match_patterns(to, || self.leaves())?;

        let downstream = self.closure(from_seed, Direction::Downstream);
        let upstream = self.closure(to_seed, Direction::Upstream);

        Ok(downstream.intersection(&upstream).cloned().collect())
    }

    fn match_patterns<'a, F>(&'a self, patterns: &[String], default: F) -> Result<Vec<&'a str>>
    where
        F: Fn() -> Vec<&'a Step>,
    {
        if patterns.is_empty() {
            return Ok(default().into_iter().map(|s| s.name.as_str()).collect());
        }

        let mut compiled = Vec::with_capacity(patterns.len());
        for p in patterns {
            compiled.push(
                Pattern::new(p).with_context(|| format!("Invalid step pattern '{p}'"))?,
            );
        }

        Ok(self
            .steps
            .iter()
            .filter(|s| compiled.iter().any(|p| p.matches(&s.name)))
            .map(|s| s.name.as_str())
            .collect())
    }

    /// Transitive closure from a seed set along dependency edges, expanding
    /// any group encountered into its members.
    fn closure(&self, seed: Vec<&str>, direction: Direction) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = seed.into_iter().collect();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            if let Some(Step {
                kind: NodeKind::Composite { children },
                ..
            }) = self.step(name)
            {
                for child in children {
                    queue.push_back(child.as_str());
                }
            }
            match direction {
                Direction::Downstream => {
                    for edge in self.dependents(name) {
                        queue.push_back(edge.from.as_str());
                    }
                }
                Direction::Upstream => {
                    for edge in self.prerequisites(name) {
                        queue.push_back(edge.to.as_str());
                    }
                }
            }
        }

        seen
    }
}
