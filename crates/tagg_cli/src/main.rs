//! `tagg` command line entry point.
//!
//! # Responsibility
//! - Parse arguments, open the graph and route to one-shot commands, the
//!   shell, piped input or the autotag driver.
//!
//! # Invariants
//! - A data dir with neither store root present is refused without
//!   `--force`, so a typo'd `-d` cannot scatter directories around.
//! - With no subcommand and stdin not a terminal, each input line is one
//!   command tuple; `#` lines are skipped.

use anyhow::{anyhow, bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use log::info;
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use tagg_core::{default_log_level, init_logging, GithubClient, TagGraph};

mod auto;
mod commands;
mod repl;

use auto::AutoArgs;
use commands::{NoConfirm, StdinConfirm};

#[derive(Parser, Debug)]
#[command(name = "tagg", version, about = "Tag and organize repositories on the filesystem")]
struct Cli {
    /// Data dir holding the `tags/` and `repos/` trees
    #[arg(short = 'd', long, global = true, default_value = "./")]
    data_dir: PathBuf,
    /// Operate even when the data dir holds no data yet
    #[arg(long, global = true)]
    force: bool,
    /// Write rotated log files into this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Operate on the tag store
    Tags(StoreArgs),
    /// Operate on the repo store
    Repos(StoreArgs),
    /// Dump both stores as one JSON document
    Export,
    /// Interactive shell with completion
    Shell,
    /// Automatically tag repos from their metadata
    Auto(AutoArgs),
}

#[derive(clap::Args, Debug)]
struct StoreArgs {
    /// One of list, add, remove, rename, show, edit, validate, links,
    /// find, link-stats (repos additionally: tag, untag)
    #[arg(default_value = "list")]
    subcmd: String,
    key: Option<String>,
    value: Option<String>,
}

pub(crate) fn print_help() {
    let _ = Cli::command().print_help();
    println!();
}

fn run_piped(graph: &mut TagGraph<GithubClient>) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.splitn(4, char::is_whitespace).map(str::trim).collect();
        let field = |i: usize| fields.get(i).copied().filter(|s| !s.is_empty());
        commands::process(
            graph,
            fields[0],
            field(1),
            field(2),
            field(3),
            &mut NoConfirm,
        )?;
    }
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(dir) = &cli.log_dir {
        let dir = if dir.is_absolute() {
            dir.clone()
        } else {
            std::env::current_dir()?.join(dir)
        };
        init_logging(default_log_level(), &dir.to_string_lossy()).map_err(|err| anyhow!(err))?;
    }

    let mut graph = TagGraph::open(&cli.data_dir, GithubClient::new("")?)?;
    if !graph.has_data() && !cli.force {
        bail!(
            "{} doesn't seem to have any data in it. Use --force to operate in it.",
            cli.data_dir.display()
        );
    }
    info!(
        "event=cli_start module=cli data_dir={}",
        cli.data_dir.display()
    );

    match cli.command {
        None => {
            if io::stdin().is_terminal() {
                print_help();
            } else {
                run_piped(&mut graph)?;
            }
        }
        Some(Command::Tags(args)) => commands::process(
            &mut graph,
            "tags",
            Some(args.subcmd.as_str()),
            args.key.as_deref(),
            args.value.as_deref(),
            &mut StdinConfirm::new(),
        )?,
        Some(Command::Repos(args)) => commands::process(
            &mut graph,
            "repos",
            Some(args.subcmd.as_str()),
            args.key.as_deref(),
            args.value.as_deref(),
            &mut StdinConfirm::new(),
        )?,
        Some(Command::Export) => commands::process(
            &mut graph,
            "export",
            None,
            None,
            None,
            &mut StdinConfirm::new(),
        )?,
        Some(Command::Shell) => repl::run(graph)?,
        Some(Command::Auto(args)) => auto::run(&mut graph, &args)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
