//! Single-step execution.
//!
//! A processor runs one atomic step on a worker thread: evaluate the run
//! predicates, apply the configured delay, tokenize the command, spawn the
//! child and stream its merged output to the step log and the listeners.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::flow::{Status, Step};

use super::listener::Listeners;
use super::tokenizer::tokenize;

/// Construction-time processor settings.
#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    /// Prefix prepended to every step command before tokenization. Empty
    /// means the tokenized command is spawned directly; tests inject `echo`
    /// to observe tokenization without running anything.
    pub launcher: String,
}

/// Runs one step to completion.
pub struct StepProcessor<'a> {
    step: &'a Step,
    log_dir: &'a Path,
    config: &'a ProcessorConfig,
}

impl<'a> StepProcessor<'a> {
    pub fn new(step: &'a Step, log_dir: &'a Path, config: &'a ProcessorConfig) -> Self {
        Self {
            step,
            log_dir,
            config,
        }
    }

    /// Execute the step and report the terminal status.
    ///
    /// Emits `on_start`, `on_output` per line and `on_completion` on the
    /// listeners. A step suppressed by its `if`/`unless` predicate completes
    /// `Skipped` without an `on_start`. The child PID is registered in
    /// `children` for the abort path while the child runs.
    pub fn run(
        &self,
        listeners: &Listeners,
        children: &Mutex<HashMap<String, u32>>,
    ) -> Status {
        let Some(command) = self.step.command() else {
            // Groups are never dispatched.
            return Status::Skipped;
        };

        if !self.predicates_allow() {
            listeners.notify_completion(self.step, Status::Skipped);
            return Status::Skipped;
        }

        listeners.notify_start(self.step, command);

        if self.step.delay > 0 {
            thread::sleep(Duration::from_secs(self.step.delay));
        }

        let status = self.launch(command, listeners, children);
        listeners.notify_completion(self.step, status);
        status
    }

    fn launch(
        &self,
        command: &str,
        listeners: &Listeners,
        children: &Mutex<HashMap<String, u32>>,
    ) -> Status {
        let log_path = self.log_dir.join(format!("{}.log", self.step.name));
        let log = match File::create(&log_path) {
            Ok(file) => Mutex::new(file),
            Err(e) => {
                listeners.notify_output(
                    self.step,
                    &format!("Unable to create log file {}: {e}", log_path.display()),
                );
                return Status::Failed;
            }
        };

        let full_command = if self.config.launcher.is_empty() {
            command.to_string()
        } else {
            format!("{} {command}", self.config.launcher)
        };
        let argv = tokenize(&full_command);
        if argv.is_empty() {
            self.emit("Empty command", &log, listeners);
            return Status::Failed;
        }

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .envs(self.step.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.step.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.emit(&format!("Unable to launch '{}': {e}", argv[0]), &log, listeners);
                return Status::Failed;
            }
        };

        children
            .lock()
            .expect("child registry lock")
            .insert(self.step.name.clone(), child.id());

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        thread::scope(|scope| {
            scope.spawn(|| self.pump(stderr, &log, listeners));
            self.pump(stdout, &log, listeners);
        });

        let status = match child.wait() {
            Ok(exit) if exit.success() => Status::Succeeded,
            Ok(_) => Status::Failed,
            Err(e) => {
                self.emit(&format!("Unable to await child: {e}"), &log, listeners);
                Status::Failed
            }
        };

        children
            .lock()
            .expect("child registry lock")
            .remove(&self.step.name);

        status
    }

    /// Stream one output pipe line by line into the shared sink.
    fn pump<R: Read>(&self, reader: R, log: &Mutex<File>, listeners: &Listeners) {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => self.emit(&line, log, listeners),
                Err(_) => break,
            }
        }
    }

    /// Append a line to the step log (flushed immediately) and deliver it to
    /// the listeners, keeping the two in the same order.
    fn emit(&self, line: &str, log: &Mutex<File>, listeners: &Listeners) {
        let mut file = log.lock().expect("log lock");
        let _ = writeln!(file, "{line}").and_then(|()| file.flush());
        listeners.notify_output(self.step, line);
    }

    fn predicates_allow(&self) -> bool {
        if let Some(condition) = &self.step.condition {
            if !self.probe(condition) {
                return false;
            }
        }
        if let Some(unless) = &self.step.unless {
            if self.probe(unless) {
                return false;
            }
        }
        true
    }

    /// Run a predicate expression through the shell; true on exit 0.
    fn probe(&self, expr: &str) -> bool {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(expr)
            .envs(self.step.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &self.step.cwd {
            cmd.current_dir(cwd);
        }
        cmd.status().map(|s| s.success()).unwrap_or(false)
    }
}
