use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;

use stc::commands::{list, run, validate};

#[derive(Parser)]
#[command(name = "stc")]
#[command(about = "System test coordinator", long_about = None)]
#[command(version)]
struct Cli {
    /// Scenario file to operate on
    scenario: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute the scenario (the default when no command is given)
    Run {
        /// Range selection: `from <patterns> [to <patterns>]`, each a
        /// comma-separated list of glob patterns over step names
        #[arg(trailing_var_arg = true)]
        range: Vec<String>,
    },

    /// Replay the status record of the last run
    List,

    /// Replay only the failed steps of the last run
    #[command(name = "listFailed")]
    ListFailed,

    /// Compile the scenario without executing it
    Validate,
}

fn main() {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("{e:#}");
            exit(1);
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let command = cli.command.unwrap_or(Command::Run { range: Vec::new() });
    match command {
        Command::Run { range } => {
            let (from, to) = parse_range(&range)?;
            run::execute(&cli.scenario, from, to)
        }
        Command::List => list::execute(&cli.scenario, false),
        Command::ListFailed => list::execute(&cli.scenario, true),
        Command::Validate => validate::execute(&cli.scenario),
    }
}

/// Parse the positional range words of `run`: `from <patterns>` and
/// `to <patterns>`, in either order, each at most once.
fn parse_range(words: &[String]) -> Result<(Vec<String>, Vec<String>)> {
    let mut from = Vec::new();
    let mut to = Vec::new();

    let mut i = 0;
    while i < words.len() {
        match words[i].as_str() {
            "from" if i + 1 < words.len() && from.is_empty() => {
                from = split_patterns(&words[i + 1]);
                i += 2;
            }
            "to" if i + 1 < words.len() && to.is_empty() => {
                to = split_patterns(&words[i + 1]);
                i += 2;
            }
            other => bail!(
                "Unexpected range argument '{other}' (expected `from <patterns> [to <patterns>]`)"
            ),
        }
    }

    Ok((from, to))
}

fn split_patterns(patterns: &str) -> Vec<String> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}
