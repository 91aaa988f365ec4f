//! Repository rules and remote transport selection

use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::args::NotifierOptions;
use crate::error::{NotifyError, Result};

pub const DEFAULT_PROTOCOL: &str = "git";

/// Transport used to fetch a repository into its mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Git,
    Ssh,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Git => "git",
            Protocol::Ssh => "ssh",
            Protocol::Https => "https",
        }
    }

    /// Fetch URL for `owner/repo` on `host`.
    pub fn remote_url(&self, host: &str, owner: &str, repo_name: &str) -> String {
        match self {
            Protocol::Git => format!("git://{}/{}/{}", host, owner, repo_name),
            Protocol::Ssh => format!("ssh://git@{}/{}/{}", host, owner, repo_name),
            Protocol::Https => format!("https://{}/{}/{}", host, owner, repo_name),
        }
    }
}

impl FromStr for Protocol {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "git" => Ok(Protocol::Git),
            "ssh" => Ok(Protocol::Ssh),
            "https" => Ok(Protocol::Https),
            other => Err(NotifyError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured repository pattern with its notifier overrides
#[derive(Debug, Clone)]
pub struct RepositoryRule {
    pub pattern: Regex,
    /// Kept as written; only checked when the rule is selected.
    pub protocol: String,
    pub options: NotifierOptions,
}

impl RepositoryRule {
    pub fn new(pattern: &str, protocol: &str, options: NotifierOptions) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            NotifyError::ConfigError(format!("Invalid repository pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern,
            protocol: protocol.to_string(),
            options,
        })
    }

    /// Unanchored search against `owner/repo`.
    pub fn matches(&self, repo_id: &str) -> bool {
        self.pattern.is_match(repo_id)
    }

    pub fn protocol(&self) -> Result<Protocol> {
        self.protocol.parse()
    }
}

/// Rules whose pattern matches `repo_id`, in configuration order.
pub fn matching_rules<'a>(
    rules: &'a [RepositoryRule],
    repo_id: &str,
) -> impl Iterator<Item = &'a RepositoryRule> {
    rules.iter().filter(move |rule| rule.matches(repo_id))
}

/// Finds the first rule matching `owner/repo_name`.
/// Returns None if there's no suitable match.
pub fn find_matching_rule<'a>(
    rules: &'a [RepositoryRule],
    owner: &str,
    repo_name: &str,
) -> Option<&'a RepositoryRule> {
    let repo_id = format!("{}/{}", owner, repo_name);
    rules.iter().find(|rule| rule.matches(&repo_id))
}
