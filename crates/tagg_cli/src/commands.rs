//! Command dispatch shared by the one-shot CLI, the shell and piped input.
//!
//! # Responsibility
//! - Map `(cmd, subcmd, key, value)` tuples onto graph operations.
//! - Own the interactive and non-interactive confirmation sessions.
//!
//! # Invariants
//! - Expected outcomes (key already exists, nothing to remove) print a
//!   message and return `Ok`; only malformed input and store failures
//!   surface as errors.
//! - A `key` argument that is a directory inside the target store root is
//!   translated back into its store key before dispatch.

use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
use tagg_core::{
    ConfirmPrompt, MetaHandle, MetaStorage, Metadata, RepoMetadataSource, StoreError, TagGraph,
    META_FILE_NAME,
};

/// Which store a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Tags,
    Repos,
}

/// Interactive yes/no session that remembers the answer per message, so a
/// bulk run asks each distinct question once.
pub struct StdinConfirm {
    history: HashMap<String, bool>,
}

impl StdinConfirm {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
        }
    }
}

impl Default for StdinConfirm {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmPrompt for StdinConfirm {
    fn confirm(&mut self, message: &str) -> bool {
        if let Some(&answer) = self.history.get(message) {
            return answer;
        }
        print!("{message}? (default yes) ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        let answer = matches!(line.trim().to_lowercase().as_str(), "" | "y" | "yes" | "ok");
        self.history.insert(message.to_string(), answer);
        answer
    }
}

/// Non-interactive session for piped input: echoes the question and
/// approves it.
pub struct NoConfirm;

impl ConfirmPrompt for NoConfirm {
    fn confirm(&mut self, message: &str) -> bool {
        println!("{message}");
        true
    }
}

/// Prints a handle the way `show` expects it: identity line, state line,
/// pretty metadata, then outgoing link keys.
fn meta_print(handle: &MetaHandle) {
    println!("{} - {}", handle.store(), handle.key());
    println!("Exists: {} Loaded: {}", handle.exists, handle.loaded);
    match serde_json::to_string_pretty(&handle.metadata) {
        Ok(json) => println!("{json}"),
        Err(err) => println!("<unprintable metadata: {err}>"),
    }
    println!("Links:");
    for link in &handle.links {
        println!("{}", link.key());
    }
}

/// Translates a directory path inside `root` back into its store key.
fn key_from_path(root: &Path, raw: &str) -> Option<String> {
    let candidate = Path::new(raw);
    if !candidate.is_dir() {
        return None;
    }
    let candidate = fs::canonicalize(candidate).ok()?;
    let root = fs::canonicalize(root).ok()?;
    let rel = candidate.strip_prefix(&root).ok()?;
    let rel = rel.to_string_lossy();
    if rel.is_empty() {
        None
    } else {
        Some(rel.to_lowercase())
    }
}

fn store_mut<'g, S: RepoMetadataSource>(
    graph: &'g mut TagGraph<S>,
    target: Target,
) -> &'g mut dyn MetaStorage {
    match target {
        Target::Tags => graph.tags_mut() as &mut dyn MetaStorage,
        Target::Repos => graph.repos_mut() as &mut dyn MetaStorage,
    }
}

fn require<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str> {
    value.ok_or_else(|| anyhow!("{what} is required"))
}

/// Runs one command tuple against the graph.
pub fn process<S: RepoMetadataSource>(
    graph: &mut TagGraph<S>,
    cmd: &str,
    subcmd: Option<&str>,
    key: Option<&str>,
    value: Option<&str>,
    confirm: &mut dyn ConfirmPrompt,
) -> Result<()> {
    if cmd == "export" {
        let dump = graph.export()?;
        println!("{}", serde_json::to_string_pretty(&dump)?);
        return Ok(());
    }

    let target = match cmd {
        "tags" => Target::Tags,
        "repos" => Target::Repos,
        other => bail!("unknown command `{other}`"),
    };
    let subcmd = subcmd.unwrap_or("list");

    let key = key.map(|raw| {
        let root = store_mut(graph, target).store_ref().root().to_path_buf();
        key_from_path(&root, raw).unwrap_or_else(|| raw.to_string())
    });
    let key = key.as_deref();

    match subcmd {
        "list" => {
            for key in store_mut(graph, target).keys()? {
                println!("{key}");
            }
        }
        "links" => {
            let key = require(key, "a key or multiple keys separated by `,`")?;
            let mut tags = Vec::new();
            for name in key.split(',') {
                let name = name.trim();
                let tag = graph.tags_mut().get(name)?;
                if !tag.exists {
                    bail!("tag `{name}` doesn't exist");
                }
                tags.push(tag);
            }
            let refs: Vec<&MetaHandle> = tags.iter().collect();
            for key in graph.repos_linked_to(&refs)? {
                println!("{key}");
            }
        }
        "add" => {
            let key = require(key, "a key")?;
            let metadata: Metadata = match value {
                Some(raw) => serde_json::from_str(raw)?,
                None => Metadata::new(),
            };
            if store_mut(graph, target).add_key(key, metadata)?.is_some() {
                println!("Added {key}");
            } else {
                println!("Add failed. Probably already existed.");
            }
        }
        "remove" => {
            let key = require(key, "a key")?;
            let removed = match target {
                Target::Tags => graph.remove_tag(key)?,
                Target::Repos => graph.remove_repo(key)?,
            };
            if removed {
                println!("Removed {key}");
            } else {
                println!("Remove failed. Probably doesn't exist.");
            }
        }
        "rename" => {
            let key = require(key, "a key")?;
            let new_key = require(value, "a new key")?;
            let outcome = match target {
                Target::Tags => graph.rename_tag(key, new_key),
                Target::Repos => graph.rename_repo(key, new_key),
            };
            match outcome {
                Ok(()) => println!("Renamed key {key} to {new_key}"),
                Err(StoreError::KeyNotFound { .. }) => {
                    println!("Rename key {key} to {new_key} failed. Probably doesn't exist.")
                }
                Err(err) => return Err(err.into()),
            }
        }
        "find" => {
            let key = require(key, "a keyword or a list of `,` separated keywords")?;
            let keywords: HashSet<String> = key
                .split(',')
                .map(|word| word.trim().to_lowercase())
                .filter(|word| !word.is_empty())
                .collect();
            for key in store_mut(graph, target).find_keywords(&keywords)? {
                println!("{key}");
            }
        }
        "show" => {
            let key = require(key, "a key")?;
            let handle = store_mut(graph, target).get(key)?;
            if handle.exists {
                meta_print(&handle);
            } else {
                println!("{key} doesn't exist");
            }
        }
        "tag" if target == Target::Repos => {
            let key = require(key, "a repo key")?;
            let value = require(value, "a tag")?;
            for name in value.split(',') {
                let name = name.trim();
                let mut tag = graph.tags_mut().get(name)?;
                if !tag.exists {
                    if !confirm.confirm(&format!("Tag {name} doesn't exist. Create")) {
                        bail!("tag doesn't exist: {name}. Abort");
                    }
                    tag = graph
                        .tags_mut()
                        .add_key(name, Metadata::new())?
                        .ok_or_else(|| anyhow!("tag could not be created: {name}"))?;
                }
                if graph.tag_repo(key, &tag, false)? {
                    println!("Added link {} to {key}", tag.key());
                } else {
                    println!(
                        "Can't add link {} to {key}. Probably already existed.",
                        tag.key()
                    );
                }
            }
        }
        "untag" if target == Target::Repos => {
            let key = require(key, "a repo key")?;
            let value = require(value, "a tag")?;
            let name = value.rsplit('/').next().unwrap_or(value);
            if graph.untag_repo(key, name)? {
                println!("Removed link {name} from {key}");
            } else {
                println!("Removed link {name} from {key} failed. Probably already removed.");
            }
        }
        "edit" => {
            let key = require(key, "a key")?;
            let handle = store_mut(graph, target).get(key)?;
            if !handle.exists {
                println!("{key} doesn't exist");
                return Ok(());
            }
            let meta_file = handle.path().join(META_FILE_NAME);
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
            let status = Command::new(&editor).arg(&meta_file).status()?;
            if !status.success() {
                log::warn!(
                    "event=edit module=cli status=failed editor={editor} file={}",
                    meta_file.display()
                );
            }
        }
        "validate" => {
            match store_mut(graph, target).validate() {
                Ok(stats) => println!("{stats}"),
                Err(StoreError::ValidationFailed { problems }) => {
                    for problem in problems {
                        println!("{problem}");
                    }
                }
                Err(err) => return Err(err.into()),
            }
            println!("Done");
        }
        "link-stats" => {
            let stats = store_mut(graph, target).link_stats()?;
            let summary: Vec<String> = stats
                .iter()
                .map(|(key, count)| format!("{key}({count})"))
                .collect();
            println!("{}", summary.join(", "));
        }
        other => bail!("unknown subcommand `{other}` for `{cmd}`"),
    }
    Ok(())
}
