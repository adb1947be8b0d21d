//! Autotag driver: feeds repo keys from GitHub or the local store into
//! the rule engine, in suggest or apply mode.

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use tagg_core::{
    ActionSink, ApplyActions, AutoTagger, AutotagStats, Definitions, GithubClient, MetaStorage,
    RepoRecord, SuggestActions, TagGraph,
};

use crate::commands::StdinConfirm;

#[derive(Args, Debug)]
pub struct AutoArgs {
    /// Apply actions instead of printing suggested commands
    #[arg(short, long)]
    pub run: bool,
    /// Ask before every action
    #[arg(short, long)]
    pub interactive: bool,
    /// Don't tag the repo's language
    #[arg(long = "no-language", action = clap::ArgAction::SetFalse)]
    pub language: bool,
    /// Don't tag non-forks as `original`
    #[arg(long = "no-original", action = clap::ArgAction::SetFalse)]
    pub original: bool,
    /// Fetch this user's repos from GitHub and tag them
    #[arg(short = 'g', long = "github", value_name = "USER")]
    pub github: Option<String>,
    /// Also fetch the user's starred repos; needs --github
    #[arg(long)]
    pub starred: bool,
    /// Fetch the most starred repos on GitHub and tag them
    #[arg(long)]
    pub top: bool,
    /// Tagging definition file; without it only the built-in rules run
    #[arg(short = 'f', long = "defs", value_name = "FILE")]
    pub defs: Option<PathBuf>,
    /// Tag every repo already in the data dir
    #[arg(short, long)]
    pub all: bool,
    /// Full name of a single repo to tag
    pub repo_name: Option<String>,
}

fn fetch_records(args: &AutoArgs) -> Result<Option<Vec<RepoRecord>>> {
    if let Some(user) = &args.github {
        eprintln!("Fetching repos for {user}");
        let client = GithubClient::new(user)?;
        let mut records: Vec<RepoRecord> = client.user_repos().collect::<Result<_, _>>()?;
        if args.starred {
            records.extend(client.starred().collect::<Result<Vec<_>, _>>()?);
        }
        return Ok(Some(records));
    }
    if args.top {
        eprintln!("Fetching the most starred repos");
        let client = GithubClient::new("")?;
        let records = client.top_repos().collect::<Result<_, _>>()?;
        return Ok(Some(records));
    }
    Ok(None)
}

fn drive<A: ActionSink<GithubClient>>(
    graph: &mut TagGraph<GithubClient>,
    args: &AutoArgs,
    defs: &Definitions,
    records: Option<Vec<RepoRecord>>,
    preset_keys: Vec<String>,
    actions: A,
) -> Result<(AutotagStats, A)> {
    let mut tagger = AutoTagger::new(graph, actions);
    tagger.tag_language = args.language;
    tagger.tag_original = args.original;
    let keys = match records {
        Some(records) => tagger.import_records(records)?,
        None => preset_keys,
    };
    let stats = tagger.run(defs, &keys)?;
    Ok((stats, tagger.into_actions()))
}

pub fn run(graph: &mut TagGraph<GithubClient>, args: &AutoArgs) -> Result<()> {
    let defs = match &args.defs {
        Some(path) => {
            eprintln!("Start tagging repos with tags defined in {}", path.display());
            Definitions::from_file(path)?
        }
        None => Definitions::default(),
    };
    if defs.rule_count() == 0 && !args.language && !args.original {
        bail!(
            "there's nothing to do; drop one of --no-language / --no-original or provide --defs"
        );
    }
    if args.starred && args.github.is_none() {
        bail!("no github account provided; add -g USER");
    }

    let records = fetch_records(args)?;
    let preset_keys = if records.is_some() {
        Vec::new()
    } else if args.all {
        graph.repos().keys()?
    } else if let Some(name) = &args.repo_name {
        vec![name.to_lowercase()]
    } else {
        bail!("there's nothing to do; use one of -g, -a, --top or provide a repo name");
    };

    if args.run {
        let actions = ApplyActions::new(args.interactive, StdinConfirm::new());
        let (stats, _) = drive(graph, args, &defs, records, preset_keys, actions)?;
        eprintln!("{stats}");
    } else {
        let mut actions = SuggestActions::new();
        if args.all {
            actions.show_skipped = false;
        }
        let (stats, actions) = drive(graph, args, &defs, records, preset_keys, actions)?;
        for line in actions.lines() {
            println!("{line}");
        }
        eprintln!("{stats}");
    }
    eprintln!("Done");
    Ok(())
}
