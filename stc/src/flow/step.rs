//! Step, group and dependency model for the process flow.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Execution status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Waiting,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl Status {
    /// Whether this status is terminal (the step will not change again).
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::Skipped)
    }
}

/// What kind of node a step is.
///
/// Groups are steps without a command: their status is derived from the
/// completion status of their members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A runnable command line.
    Atomic { command: String },
    /// A named collection of member step names.
    Composite { children: Vec<String> },
}

/// A single node of the process flow, immutable after compilation.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub kind: NodeKind,
    /// Environment overrides applied on top of the parent environment.
    pub env: Vec<(String, String)>,
    /// Working directory for the child process, if overridden.
    pub cwd: Option<PathBuf>,
    /// Run condition: the step is skipped unless this exits 0.
    pub condition: Option<String>,
    /// Inverse run condition: the step is skipped if this exits 0.
    pub unless: Option<String>,
    /// Seconds to sleep after dispatch, before the command is spawned.
    pub delay: u64,
    /// Name of the directly enclosing group, if any.
    pub group: Option<String>,
}

impl Step {
    /// Create an atomic step with just a name and command.
    pub fn atomic(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Atomic {
                command: command.into(),
            },
            env: Vec::new(),
            cwd: None,
            condition: None,
            unless: None,
            delay: 0,
            group: None,
        }
    }

    /// Create a group node with the given member names.
    pub fn composite(name: impl Into<String>, children: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Composite { children },
            env: Vec::new(),
            cwd: None,
            condition: None,
            unless: None,
            delay: 0,
            group: None,
        }
    }

    /// The command line for atomic steps; `None` for groups.
    pub fn command(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Atomic { command } => Some(command),
            NodeKind::Composite { .. } => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Composite { .. })
    }
}

/// A directed edge from a dependent step to one of its prerequisites.
///
/// A soft edge only requires the prerequisite to have finished, not to have
/// succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The dependent step.
    pub from: String,
    /// The prerequisite step or group.
    pub to: String,
    pub soft: bool,
}

impl Dependency {
    pub fn new(from: impl Into<String>, to: impl Into<String>, soft: bool) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            soft,
        }
    }

    /// Parse a single entry of a `requires` list. A leading `!` marks the
    /// edge as soft.
    pub fn parse(from: &str, entry: &str) -> Self {
        let entry = entry.trim();
        match entry.strip_prefix('!') {
            Some(name) => Self::new(from, name.trim(), true),
            None => Self::new(from, entry, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!Status::Waiting.is_terminal());
        assert!(!Status::InProgress.is_terminal());
        assert!(Status::Succeeded.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Skipped.is_terminal());
    }

    #[test]
    fn test_status_serializes_as_wire_words() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let back: Status = serde_json::from_str("\"SKIPPED\"").unwrap();
        assert_eq!(back, Status::Skipped);
    }

    #[test]
    fn test_parse_soft_dependency() {
        let dep = Dependency::parse("c", "!b");
        assert_eq!(dep.to, "b");
        assert!(dep.soft);

        let dep = Dependency::parse("c", " a ");
        assert_eq!(dep.to, "a");
        assert!(!dep.soft);
    }

    #[test]
    fn test_group_has_no_command() {
        let group = Step::composite("g", vec!["a".to_string()]);
        assert!(group.is_group());
        assert!(group.command().is_none());

        let step = Step::atomic("a", "true");
        assert_eq!(step.command(), Some("true"));
    }
}
