//! Interactive shell with command and key completion.
//!
//! # Responsibility
//! - Read `cmd subcmd key value` lines and dispatch them.
//! - Complete commands from fixed word lists and keys from store hints.
//!
//! # Invariants
//! - Key hints are cached per directory prefix; any add/remove/rename on
//!   a store drops that store's hint cache.
//! - `Ctrl-C` abandons the current line; `Ctrl-D` and `exit` leave the
//!   shell after saving history.

use anyhow::Result;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tagg_core::{EventKind, GithubClient, MetaStorage, TagGraph};

use crate::commands::{self, StdinConfirm};

const HISTORY_FILE: &str = ".tagg_history";

const COMMANDS: &[&str] = &["tags", "repos", "export", "help", "exit"];
const TAG_SUBCMDS: &[&str] = &[
    "list",
    "add",
    "remove",
    "rename",
    "show",
    "edit",
    "validate",
    "links",
    "find",
    "link-stats",
];
const REPO_SUBCMDS: &[&str] = &[
    "list",
    "add",
    "remove",
    "rename",
    "show",
    "edit",
    "validate",
    "links",
    "find",
    "link-stats",
    "tag",
    "untag",
];

type HintCache = Rc<RefCell<HashMap<String, Vec<String>>>>;

struct ReplHelper {
    graph: Rc<RefCell<TagGraph<GithubClient>>>,
    tag_hints: HintCache,
    repo_hints: HintCache,
}

impl ReplHelper {
    /// Key completions for one store, served from the per-prefix cache.
    fn key_hints(&self, for_tags: bool, prefix: &str) -> Vec<String> {
        if prefix.is_empty() {
            return Vec::new();
        }
        let (dir, name) = match prefix.rfind('/') {
            Some(i) => (&prefix[..i], &prefix[i + 1..]),
            None => ("", prefix),
        };
        let cache = if for_tags {
            &self.tag_hints
        } else {
            &self.repo_hints
        };
        let mut cache = cache.borrow_mut();
        let children = match cache.get(dir) {
            Some(children) => children.clone(),
            None => {
                let graph = self.graph.borrow();
                let store: &dyn MetaStorage = if for_tags {
                    graph.tags()
                } else {
                    graph.repos()
                };
                let children = store.key_hints(dir).unwrap_or_default();
                cache.insert(dir.to_string(), children.clone());
                children
            }
        };
        children
            .iter()
            .filter(|child| child.starts_with(name))
            .map(|child| {
                if dir.is_empty() {
                    child.clone()
                } else {
                    format!("{dir}/{child}")
                }
            })
            .collect()
    }
}

fn pairs_from(candidates: Vec<String>) -> Vec<Pair> {
    candidates
        .into_iter()
        .map(|candidate| Pair {
            display: candidate.clone(),
            replacement: candidate,
        })
        .collect()
}

fn word_matches(words: &[&str], prefix: &str) -> Vec<String> {
    words
        .iter()
        .filter(|word| word.starts_with(prefix))
        .map(|word| word.to_string())
        .collect()
}

impl rustyline::Helper for ReplHelper {}
impl Highlighter for ReplHelper {}
impl Validator for ReplHelper {}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        None
    }
}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let before = &line[..pos];
        let start = before
            .rfind(|c: char| c.is_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        let word = &before[start..];
        let tokens: Vec<&str> = before[..start].split_whitespace().collect();

        let candidates = match tokens.len() {
            0 => word_matches(COMMANDS, word),
            1 => match tokens[0] {
                "tags" => word_matches(TAG_SUBCMDS, word),
                "repos" => word_matches(REPO_SUBCMDS, word),
                _ => Vec::new(),
            },
            _ => {
                // `repos links <tag>` and the second argument of
                // `repos tag <repo> <tag>` both complete tag keys.
                let for_tags = match (tokens[0], tokens[1]) {
                    ("tags", _) => true,
                    ("repos", "links") => true,
                    ("repos", "tag") if tokens.len() >= 3 => true,
                    ("repos", _) => false,
                    _ => return Ok((start, Vec::new())),
                };
                self.key_hints(for_tags, word)
            }
        };
        Ok((start, pairs_from(candidates)))
    }
}

fn invalidating_listener(cache: &HintCache) -> tagg_core::store::Listener {
    let cache = Rc::clone(cache);
    Box::new(move |event| {
        if matches!(
            event,
            EventKind::AddKey | EventKind::RemoveKey | EventKind::RenameKey
        ) {
            cache.borrow_mut().clear();
        }
    })
}

/// Runs the shell until `exit` or end of input.
pub fn run(graph: TagGraph<GithubClient>) -> Result<()> {
    let graph = Rc::new(RefCell::new(graph));
    let tag_hints: HintCache = Rc::default();
    let repo_hints: HintCache = Rc::default();
    {
        let mut graph = graph.borrow_mut();
        graph.tags_mut().subscribe(invalidating_listener(&tag_hints));
        graph
            .repos_mut()
            .subscribe(invalidating_listener(&repo_hints));
    }

    let mut rl: Editor<ReplHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(ReplHelper {
        graph: Rc::clone(&graph),
        tag_hints,
        repo_hints,
    }));
    let _ = rl.load_history(HISTORY_FILE);

    let mut confirm = StdinConfirm::new();
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                if line == "exit" {
                    break;
                }
                if line == "help" || line.starts_with("help ") {
                    crate::print_help();
                    continue;
                }

                let fields: Vec<&str> = line.splitn(4, ' ').map(str::trim).collect();
                let field = |i: usize| fields.get(i).copied().filter(|s| !s.is_empty());
                let mut graph = graph.borrow_mut();
                if let Err(err) = commands::process(
                    &mut graph,
                    fields[0],
                    field(1),
                    field(2),
                    field(3),
                    &mut confirm,
                ) {
                    println!("{err:#}");
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}
