//! Process-flow coordination.
//!
//! The coordinator owns the compiled flow, the per-step status map and the
//! worker slots. Dispatch is event-driven: every status transition re-runs
//! the scheduling pass, which first propagates skips (doomed steps, halt on
//! error), then launches every dispatchable step while slots are free, in
//! the flow's stable topological order.

pub mod listener;
pub mod processor;
pub mod record;
pub mod tokenizer;


use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::flow::{NodeKind, ProcessFlow, Status, Step};
use crate::process;

pub use listener::{Listeners, StepListener};
pub use processor::{ProcessorConfig, StepProcessor};
pub use record::{StatusEvent, StatusRecord, RECORD_FILE};

/// Grace period between SIGTERM and SIGKILL when aborting a run.
const ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker slots; each running step occupies one for the lifetime of its
    /// child process.
    pub workers: usize,
    /// Stop dispatching new steps after the first failure.
    pub halt_on_error: bool,
    pub processor: ProcessorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            halt_on_error: false,
            processor: ProcessorConfig::default(),
        }
    }
}

/// Mutable run state, guarded by one lock.
struct RunState {
    /// Status per atomic step; group status is derived on demand.
    status: HashMap<String, Status>,
    /// Steps skipped because they fell outside the active subgraph of a
    /// range run. Such skips satisfy hard dependencies.
    inactive: HashSet<String>,
    running: usize,
    halt_on_error: bool,
    aborted: bool,
    started: Option<Instant>,
    elapsed: Option<Duration>,
    record: StatusRecord,
}

struct Inner {
    flow: ProcessFlow,
    log_dir: PathBuf,
    config: CoordinatorConfig,
    listeners: Listeners,
    /// PIDs of running children, for the abort path.
    children: Mutex<HashMap<String, u32>>,
    state: Mutex<RunState>,
    done: Condvar,
}

/// Schedules a compiled process flow across a bounded worker pool.
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(flow: ProcessFlow, log_dir: PathBuf, config: CoordinatorConfig) -> Self {
        let status = flow
            .steps()
            .iter()
            .filter(|s| !s.is_group())
            .map(|s| (s.name.clone(), Status::Waiting))
            .collect();

        let state = RunState {
            status,
            inactive: HashSet::new(),
            running: 0,
            halt_on_error: config.halt_on_error,
            aborted: false,
            started: None,
            elapsed: None,
            record: StatusRecord::new(&log_dir),
        };

        Self {
            inner: Arc::new(Inner {
                flow,
                log_dir,
                config,
                listeners: Listeners::new(),
                children: Mutex::new(HashMap::new()),
                state: Mutex::new(state),
                done: Condvar::new(),
            }),
        }
    }

    /// Mark every step `Waiting` and truncate the status record.
    pub fn reset(&self) -> Result<()> {
        self.reset_range(&[], &[])
    }

    /// Prepare a partial re-run: steps inside `subgraph(from, to)` become
    /// `Waiting`, everything else is skipped up front and will neither run
    /// nor block its dependents.
    pub fn reset_range(&self, from: &[String], to: &[String]) -> Result<()> {
        let inner = &self.inner;
        let active = inner.flow.subgraph(from, to)?;

        fs::create_dir_all(&inner.log_dir).with_context(|| {
            format!("Unable to create log directory {}", inner.log_dir.display())
        })?;

        let mut state = inner.lock_state();
        if state.running > 0 {
            bail!("Cannot reset while steps are running");
        }

        state.record.reset()?;
        state.inactive.clear();
        state.aborted = false;
        state.started = None;
        state.elapsed = None;

        let names: Vec<String> = state.status.keys().cloned().collect();
        for name in names {
            if active.contains(&name) {
                state.status.insert(name, Status::Waiting);
            } else {
                state.status.insert(name.clone(), Status::Skipped);
                state.inactive.insert(name.clone());
                inner.append_record(&mut state, StatusEvent::now(name, Status::Skipped, None));
            }
        }

        Ok(())
    }

    /// Begin scheduling; returns immediately.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.started.is_none() {
                state.started = Some(Instant::now());
            }
        }
        self.inner.schedule();
    }

    /// Block until every step is terminal. Returns the scenario exit code:
    /// 0 when nothing failed and the run was not aborted, 1 otherwise.
    pub fn wait_for(&self) -> i32 {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        while !inner.all_terminal(&state) {
            state = inner.done.wait(state).expect("coordinator state poisoned");
        }

        let failed = state.status.values().any(|s| *s == Status::Failed);
        i32::from(failed || state.aborted)
    }

    /// Abort the run: stop dispatching, skip everything still waiting and
    /// terminate running children (SIGTERM, then SIGKILL after a grace
    /// period).
    pub fn abort(&self) {
        let inner = &self.inner;
        let pids: Vec<u32> = {
            let mut state = inner.lock_state();
            state.aborted = true;

            let waiting: Vec<String> = state
                .status
                .iter()
                .filter(|(_, s)| **s == Status::Waiting)
                .map(|(n, _)| n.clone())
                .collect();
            for name in waiting {
                inner.skip_step(&mut state, &name);
            }
            inner.check_complete(&mut state);

            inner.lock_children().values().copied().collect()
        };

        for pid in &pids {
            process::terminate(*pid);
        }

        if !pids.is_empty() {
            let grace = Arc::clone(inner);
            thread::spawn(move || {
                thread::sleep(ABORT_GRACE);
                let stubborn: Vec<u32> = grace.lock_children().values().copied().collect();
                for pid in stubborn {
                    if process::is_process_alive(pid) {
                        process::force_kill(pid);
                    }
                }
            });
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn StepListener>) {
        self.inner.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StepListener>) {
        self.inner.listeners.remove(listener);
    }

    /// Replay the persisted status record.
    pub fn records(&self) -> Result<Vec<StatusEvent>> {
        StatusRecord::load(&self.inner.log_dir)
    }

    /// Current status of a step or group (group status is derived from its
    /// members).
    pub fn status_of(&self, name: &str) -> Option<Status> {
        self.inner.flow.step(name)?;
        let state = self.inner.lock_state();
        Some(self.inner.derived_status(&state, name))
    }

    pub fn steps(&self) -> &[Step] {
        self.inner.flow.steps()
    }

    pub fn flow(&self) -> &ProcessFlow {
        &self.inner.flow
    }

    pub fn log_dir(&self) -> &Path {
        &self.inner.log_dir
    }

    /// Whether the run was aborted.
    pub fn aborted(&self) -> bool {
        self.inner.lock_state().aborted
    }

    /// Wall-clock duration of the run so far (or of the whole run once every
    /// step is terminal).
    pub fn duration(&self) -> Duration {
        let state = self.inner.lock_state();
        match (state.elapsed, state.started) {
            (Some(elapsed), _) => elapsed,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    pub fn set_halt_on_error(&self, halt: bool) {
        self.inner.lock_state().halt_on_error = halt;
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().expect("coordinator state poisoned")
    }

    fn lock_children(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.children.lock().expect("child registry poisoned")
    }

    /// One scheduling pass: propagate skips, then fill free worker slots.
    fn schedule(self: &Arc<Self>) {
        let launched = {
            let mut state = self.lock_state();
            self.apply_skips(&mut state);
            let launched = self.launch_ready(&mut state);
            self.check_complete(&mut state);
            launched
        };

        for name in launched {
            let inner = Arc::clone(self);
            thread::spawn(move || inner.run_step(&name));
        }
    }

    /// Worker body: run the step, record the outcome, reschedule.
    fn run_step(self: &Arc<Self>, name: &str) {
        let step = self.flow.step(name).expect("dispatched step exists");
        let status = StepProcessor::new(step, &self.log_dir, &self.config.processor)
            .run(&self.listeners, &self.children);

        {
            let mut state = self.lock_state();
            state.status.insert(name.to_string(), status);
            state.running -= 1;
            self.append_record(&mut state, StatusEvent::now(name, status, None));
        }
        self.schedule();
    }

    /// Skip doomed steps (and, in halt-on-error mode after a failure, every
    /// waiting step), cascading until a fixed point.
    fn apply_skips(&self, state: &mut RunState) {
        loop {
            let halt = state.halt_on_error
                && state.status.values().any(|s| *s == Status::Failed);

            let doomed: Vec<String> = self
                .flow
                .topo_order()
                .iter()
                .filter(|name| state.status.get(name.as_str()) == Some(&Status::Waiting))
                .filter(|name| halt || self.doomed(state, name.as_str()))
                .cloned()
                .collect();

            if doomed.is_empty() {
                return;
            }
            for name in doomed {
                self.skip_step(state, &name);
            }
        }
    }

    /// Transition one waiting step to `Skipped`, with record + listeners.
    fn skip_step(&self, state: &mut RunState, name: &str) {
        state.status.insert(name.to_string(), Status::Skipped);
        self.append_record(state, StatusEvent::now(name, Status::Skipped, None));
        if let Some(step) = self.flow.step(name) {
            self.listeners.notify_completion(step, Status::Skipped);
        }
    }

    /// Launch dispatchable steps while worker slots are free, in stable
    /// topological order.
    fn launch_ready(&self, state: &mut RunState) -> Vec<String> {
        let mut launched = Vec::new();
        if state.aborted {
            return launched;
        }

        for name in self.flow.topo_order() {
            if state.running >= self.config.workers {
                break;
            }
            if !self.dispatchable(state, name) {
                continue;
            }

            let command = self
                .flow
                .step(name)
                .and_then(|s| s.command())
                .map(String::from);
            state.status.insert(name.clone(), Status::InProgress);
            state.running += 1;
            self.append_record(
                state,
                StatusEvent::now(name.clone(), Status::InProgress, command),
            );
            launched.push(name.clone());
        }

        launched
    }

    /// A step may be dispatched when it is waiting and every prerequisite
    /// edge is satisfied: hard edges need success (or an inactive skip),
    /// soft edges only need the prerequisite to have finished.
    fn dispatchable(&self, state: &RunState, name: &str) -> bool {
        if state.status.get(name) != Some(&Status::Waiting) {
            return false;
        }
        self.flow.prerequisites(name).iter().all(|edge| {
            if edge.soft {
                self.is_terminal(state, &edge.to)
            } else {
                self.hard_satisfied(state, &edge.to)
            }
        })
    }

    /// A waiting step is doomed once some hard prerequisite has finished in
    /// a way that can never satisfy the edge.
    fn doomed(&self, state: &RunState, name: &str) -> bool {
        self.flow.prerequisites(name).iter().any(|edge| {
            !edge.soft
                && self.is_terminal(state, &edge.to)
                && !self.hard_satisfied(state, &edge.to)
        })
    }

    /// Whether a hard edge on this prerequisite is satisfied. Groups satisfy
    /// through all of their members.
    fn hard_satisfied(&self, state: &RunState, name: &str) -> bool {
        match self.flow.step(name).map(|s| &s.kind) {
            Some(NodeKind::Composite { children }) => children
                .iter()
                .all(|child| self.hard_satisfied(state, child)),
            Some(NodeKind::Atomic { .. }) => match state.status.get(name) {
                Some(Status::Succeeded) => true,
                Some(Status::Skipped) => state.inactive.contains(name),
                _ => false,
            },
            None => false,
        }
    }

    /// Whether a step (or, for groups, every member) has finished.
    fn is_terminal(&self, state: &RunState, name: &str) -> bool {
        match self.flow.step(name).map(|s| &s.kind) {
            Some(NodeKind::Composite { children }) => {
                children.iter().all(|child| self.is_terminal(state, child))
            }
            Some(NodeKind::Atomic { .. }) => state
                .status
                .get(name)
                .map(|s| s.is_terminal())
                .unwrap_or(false),
            None => false,
        }
    }

    /// Effective status of a node; groups derive theirs from the members,
    /// worst terminal case first (`Failed` over `Skipped` over `Succeeded`).
    fn derived_status(&self, state: &RunState, name: &str) -> Status {
        match self.flow.step(name).map(|s| &s.kind) {
            Some(NodeKind::Composite { children }) => {
                let statuses: Vec<Status> = children
                    .iter()
                    .map(|child| self.derived_status(state, child))
                    .collect();
                if statuses.iter().all(|s| s.is_terminal()) {
                    if statuses.contains(&Status::Failed) {
                        Status::Failed
                    } else if statuses.contains(&Status::Skipped) {
                        Status::Skipped
                    } else {
                        Status::Succeeded
                    }
                } else if statuses.contains(&Status::InProgress) {
                    Status::InProgress
                } else {
                    Status::Waiting
                }
            }
            _ => state.status.get(name).copied().unwrap_or(Status::Waiting),
        }
    }

    fn all_terminal(&self, state: &RunState) -> bool {
        state.status.values().all(|s| s.is_terminal())
    }

    /// Release `wait_for` once nothing is waiting or running.
    fn check_complete(&self, state: &mut RunState) {
        if self.all_terminal(state) {
            if state.elapsed.is_none() {
                state.elapsed = state.started.map(|s| s.elapsed());
            }
            self.done.notify_all();
        }
    }

    fn append_record(&self, state: &mut RunState, event: StatusEvent) {
        if let Err(e) = state.record.append(&event) {
            eprintln!("Warning: unable to persist status event: {e:#}");
        }
    }
}
