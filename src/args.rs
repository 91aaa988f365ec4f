//! Notifier command-line arguments
//!
//! Options are merged from the global `[notifier.options]` table and the
//! matched rule's `options`, combined with per-push metadata, then
//! flattened into `--name [value]` pairs for the notifier tool.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::event::PushEvent;
use crate::mirror::MirrorState;

/// A configured notifier option value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Integer(i64),
    Text(String),
    /// Multi-valued option, passed to the tool comma-joined
    List(Vec<String>),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Flag(value)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(values: Vec<&str>) -> Self {
        OptionValue::List(values.into_iter().map(String::from).collect())
    }
}

/// Option name -> value, as read from configuration
pub type NotifierOptions = BTreeMap<String, OptionValue>;

/// A finalized argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Bare `--name`
    Flag,
    /// `--name value`
    Value(String),
}

/// Arguments handed to one notifier invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierArgs {
    args: BTreeMap<String, ArgValue>,
}

impl NotifierArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name)
    }

    /// Value of a `--name value` argument, `None` for flags and absent names.
    pub fn value(&self, name: &str) -> Option<&str> {
        match self.args.get(name) {
            Some(ArgValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn has_flag(&self, name: &str) -> bool {
        matches!(self.args.get(name), Some(ArgValue::Flag))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Flatten into the argument vector passed to the tool, ordered by name.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() * 2);
        for (name, value) in &self.args {
            argv.push(format!("--{}", name));
            if let ArgValue::Value(v) = value {
                argv.push(v.clone());
            }
        }
        argv
    }
}

impl fmt::Display for NotifierArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_argv().join(" "))
    }
}

/// Build the notifier arguments for one push.
///
/// Rule overrides replace same-named base options. `uri` defaults to the
/// event's repository URL unless a non-empty one is configured, and the committer travels as `sender`. On a
/// mirror without the notifier's state file, `silent_init` adds
/// `updateonly` so the first run only records a baseline.
pub fn build_args(
    base: &NotifierOptions,
    overrides: &NotifierOptions,
    event: &PushEvent,
    mirror: &MirrorState,
    silent_init: bool,
) -> NotifierArgs {
    let mut options = base.clone();
    for (name, value) in overrides {
        options.insert(name.clone(), value.clone());
    }

    // An empty or false `uri` is as good as missing.
    let explicit_uri = matches!(
        options.get("uri").cloned().and_then(finalize),
        Some(ArgValue::Value(_))
    );
    if !explicit_uri {
        options.insert(
            "uri".to_string(),
            OptionValue::Text(event.repository_url.clone()),
        );
    }

    if let Some(email) = &event.committer_email {
        options.insert("committer".to_string(), OptionValue::Text(email.clone()));
    }
    if let Some(committer) = options.remove("committer") {
        options.insert("sender".to_string(), committer);
    }

    let commit_link = format!(
        "{}/commit/{}",
        event.repository_url.trim_end_matches('/'),
        event.after
    );
    if event.is_ref_created() {
        options.insert("link".to_string(), OptionValue::Text(commit_link));
        options.remove("compare");
    } else if event.is_ref_deleted() {
        options.insert(
            "link".to_string(),
            OptionValue::Text(event.compare_url.clone()),
        );
        options.remove("compare");
    } else {
        options.insert("link".to_string(), OptionValue::Text(commit_link));
        options.insert(
            "compare".to_string(),
            OptionValue::Text(event.compare_url.clone()),
        );
    }

    if silent_init && !mirror.initialized {
        options.insert("updateonly".to_string(), OptionValue::Flag(true));
    }

    let args = options
        .into_iter()
        .filter_map(|(name, value)| finalize(value).map(|v| (name, v)))
        .collect();
    NotifierArgs { args }
}

/// Drops unset values: `false`, empty strings, empty lists.
fn finalize(value: OptionValue) -> Option<ArgValue> {
    match value {
        OptionValue::Flag(true) => Some(ArgValue::Flag),
        OptionValue::Flag(false) => None,
        OptionValue::Integer(n) => Some(ArgValue::Value(n.to_string())),
        OptionValue::Text(s) if s.is_empty() => None,
        OptionValue::Text(s) => Some(ArgValue::Value(s)),
        OptionValue::List(items) => {
            let items: Vec<String> = items.into_iter().filter(|i| !i.is_empty()).collect();
            if items.is_empty() {
                None
            } else {
                Some(ArgValue::Value(items.join(",")))
            }
        }
    }
}
