//! Colored terminal reporting of step status events.
//!
//! The reporter is a plain listener: it never touches coordinator state. It
//! is also used by `list`/`listFailed` to replay recorded events.

use chrono::{Local, TimeZone, Utc};
use colored::{Color, Colorize};
use std::env;

use crate::coordinator::StepListener;
use crate::flow::{Status, Step};

/// Palette selection, from the `stcColor` environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// No coloring.
    Plain,
    /// Standard palette (`stcColor=true`).
    Standard,
    /// Brighter palette for dark backgrounds (`stcColor=dark`).
    Dark,
    /// Deeper palette for light backgrounds (`stcColor=light`).
    Light,
}

impl ColorMode {
    pub fn from_env() -> Self {
        match env::var("stcColor").as_deref() {
            Ok("true") => Self::Standard,
            Ok("dark") => Self::Dark,
            Ok("light") => Self::Light,
            _ => Self::Plain,
        }
    }
}

pub struct TerminalReporter {
    mode: ColorMode,
}

impl TerminalReporter {
    pub fn new(mode: ColorMode) -> Self {
        Self { mode }
    }

    pub fn from_env() -> Self {
        Self::new(ColorMode::from_env())
    }

    /// Print one status line: timestamp, step name, action.
    pub fn print_event(&self, time_ms: i64, step: &str, status: Status) {
        let time = Utc
            .timestamp_millis_opt(time_ms)
            .single()
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "????-??-?? ??:??:??".to_string());

        let line = format!("{step} {}", action(status));
        println!("{time}  {}", self.paint(&line, status));
    }

    fn paint(&self, text: &str, status: Status) -> String {
        match self.status_color(status) {
            Some(color) => text.color(color).to_string(),
            None => text.to_string(),
        }
    }

    fn status_color(&self, status: Status) -> Option<Color> {
        let palette = match self.mode {
            ColorMode::Plain => return None,
            ColorMode::Standard => [Color::Cyan, Color::Green, Color::Red, Color::BrightBlack],
            ColorMode::Dark => [
                Color::BrightCyan,
                Color::BrightGreen,
                Color::BrightRed,
                Color::BrightBlack,
            ],
            ColorMode::Light => [Color::Blue, Color::Green, Color::Red, Color::Black],
        };
        match status {
            Status::InProgress => Some(palette[0]),
            Status::Succeeded => Some(palette[1]),
            Status::Failed => Some(palette[2]),
            Status::Skipped => Some(palette[3]),
            Status::Waiting => None,
        }
    }
}

impl StepListener for TerminalReporter {
    fn on_start(&self, step: &Step, _command: &str) {
        self.print_event(Utc::now().timestamp_millis(), &step.name, Status::InProgress);
    }

    fn on_completion(&self, step: &Step, status: Status) {
        self.print_event(Utc::now().timestamp_millis(), &step.name, status);
    }
}

/// Human verb for a status event.
fn action(status: Status) -> &'static str {
    match status {
        Status::InProgress => "started",
        Status::Succeeded => "completed",
        Status::Failed => "failed",
        Status::Skipped => "skipped",
        Status::Waiting => "waiting",
    }
}

/// Update the terminal title when `stcTitle` is set.
pub fn set_terminal_title(scenario: &str) {
    if let Ok(prefix) = env::var("stcTitle") {
        print!("\x1b]0;{prefix} {scenario}\x07");
    }
}
