//! Topological ordering and cycle diagnostics for the process flow.

use anyhow::{bail, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::step::{Dependency, Step};

/// Produce a stable topological order over the steps: prerequisites first,
/// ties broken by declaration order.
///
/// On a cycle, the offending chain is reconstructed and reported in the
/// error message.
pub fn topological_order(steps: &[Step], edges: &[Dependency]) -> Result<Vec<String>> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    // requires[i] = prerequisite indices of step i; dependents is the reverse.
    let mut pending: Vec<usize> = vec![0; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for edge in edges {
        let from = index[edge.from.as_str()];
        let to = index[edge.to.as_str()];
        pending[from] += 1;
        dependents[to].push(from);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, &n)| n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(steps.len());

    while let Some(Reverse(i)) = ready.pop() {
        order.push(steps[i].name.clone());
        for &dep in &dependents[i] {
            pending[dep] -= 1;
            if pending[dep] == 0 {
                ready.push(Reverse(dep));
            }
        }
    }

    if order.len() != steps.len() {
        let residual: Vec<&str> = steps
            .iter()
            .enumerate()
            .filter(|(i, _)| pending[*i] > 0)
            .map(|(_, s)| s.name.as_str())
            .collect();
        let cycle = find_cycle(&residual, edges)
            .unwrap_or_else(|| residual.iter().map(|s| s.to_string()).collect());
        bail!("Dependency cycle detected: {}", cycle.join(" -> "));
    }

    Ok(order)
}

/// DFS over the residual subgraph to reconstruct one concrete cycle.
fn find_cycle(residual: &[&str], edges: &[Dependency]) -> Option<Vec<String>> {
    let nodes: HashSet<&str> = residual.iter().copied().collect();
    let mut requires: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        if nodes.contains(edge.from.as_str()) && nodes.contains(edge.to.as_str()) {
            requires
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
    }

    let mut visited = HashSet::new();
    let mut stack = HashSet::new();
    let mut path = Vec::new();

    for &start in residual {
        if !visited.contains(start) {
            if let Some(cycle) = dfs(start, &requires, &mut visited, &mut stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs<'a>(
    node: &'a str,
    requires: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    stack.insert(node);
    path.push(node);

    if let Some(next) = requires.get(node) {
        for &dep in next {
            if !visited.contains(dep) {
                if let Some(cycle) = dfs(dep, requires, visited, stack, path) {
                    return Some(cycle);
                }
            } else if stack.contains(dep) {
                let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
        }
    }

    path.pop();
    stack.remove(node);
    None
}
