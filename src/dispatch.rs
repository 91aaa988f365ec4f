//! Per-push dispatch: match a rule, refresh the mirror, run the notifier
//!
//! ```text
//! RECEIVED -> MATCHED -> MIRRORED -> ARGS_BUILT -> NOTIFIED -> DONE
//!     |                     |                          |
//!     +-> NO_MATCH          +-> FAILED                 +-> FAILED
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::args::{NotifierArgs, build_args};
use crate::config::{ConfigSnapshot, ConfigStore};
use crate::error::NotifyError;
use crate::event::PushEvent;
use crate::mirror::{MirrorManager, mirror_state, update_mirror};
use crate::notifier::Notifier;
use crate::rules::{Protocol, RepositoryRule, matching_rules};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Matched,
    Mirrored,
    ArgsBuilt,
    Notified,
    Done,
    NoMatch,
    Failed,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// No rule with a usable protocol matched; nothing was touched
    NoMatch,
    Done {
        directory: PathBuf,
        args: NotifierArgs,
    },
    Failed(NotifyError),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Done { .. })
    }

    pub fn state(&self) -> DispatchState {
        match self {
            DispatchOutcome::NoMatch => DispatchState::NoMatch,
            DispatchOutcome::Done { .. } => DispatchState::Done,
            DispatchOutcome::Failed(_) => DispatchState::Failed,
        }
    }
}

/// Everything decided before any side effect happens
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub event: PushEvent,
    pub rule: RepositoryRule,
    pub protocol: Protocol,
    pub remote_url: String,
    /// Configuration generation the dispatch runs against
    pub snapshot: Arc<ConfigSnapshot>,
}

/// First rule matching the event whose protocol is supported.
///
/// Matching rules with an unsupported protocol are logged and skipped.
pub fn select_rule<'a>(
    rules: &'a [RepositoryRule],
    event: &PushEvent,
) -> Option<(&'a RepositoryRule, Protocol)> {
    let repo_id = event.repo_id();
    for rule in matching_rules(rules, &repo_id) {
        match rule.protocol() {
            Ok(protocol) => return Some((rule, protocol)),
            Err(e) => error!(
                "Rule '{}' matches {} but is unusable: {}; trying next rule",
                rule.pattern, repo_id, e
            ),
        }
    }
    None
}

/// One async mutex per `owner/repo`. Entries are dropped once no dispatch
/// holds or waits on them.
#[derive(Default)]
pub struct RepoLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, repo_id: &str) -> RepoGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(repo_id.to_string()).or_default())
        };
        RepoGuard {
            locks: self,
            repo_id: repo_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of repositories with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, repo_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under this lock, so a count of 1 means idle.
        let idle = locks
            .get(repo_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(repo_id);
        }
    }
}

/// Held while a repository is being dispatched
pub struct RepoGuard<'a> {
    locks: &'a RepoLocks,
    repo_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RepoGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.repo_id);
    }
}

pub struct Dispatcher {
    config: Arc<ConfigStore>,
    locks: RepoLocks,
}

impl Dispatcher {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            locks: RepoLocks::new(),
        }
    }

    /// Match the event against the active rules. `None` means no-op.
    pub fn plan(&self, event: PushEvent) -> Option<DispatchPlan> {
        let snapshot = self.config.snapshot();
        let repo_id = event.repo_id();
        transition(&repo_id, DispatchState::Received);

        let Some((rule, protocol)) = select_rule(&snapshot.rules, &event) else {
            warn!(
                "No matching repository rule for '{}' ({}), skipping.",
                repo_id,
                event.sha_range()
            );
            transition(&repo_id, DispatchState::NoMatch);
            return None;
        };

        let remote_url = protocol.remote_url(&snapshot.remote_host, &event.owner, &event.repo_name);
        info!(
            "Push to '{}' ({}) matched rule '{}', remote {}",
            repo_id,
            event.sha_range(),
            rule.pattern,
            remote_url
        );
        transition(&repo_id, DispatchState::Matched);

        Some(DispatchPlan {
            rule: rule.clone(),
            protocol,
            remote_url,
            event,
            snapshot,
        })
    }

    /// Mirror, build arguments and notify. Serialized per repository.
    pub async fn execute(&self, plan: DispatchPlan) -> DispatchOutcome {
        let DispatchPlan {
            event,
            rule,
            remote_url,
            snapshot,
            ..
        } = plan;
        let repo_id = event.repo_id();
        let _guard = self.locks.lock(&repo_id).await;

        let mirrors = MirrorManager::new(&snapshot.workdir);
        let directory = match mirrors.ensure_mirror(&event.owner, &event.repo_name).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(
                    "Cannot prepare mirror for '{}' ({}) under '{}': {}",
                    repo_id,
                    event.sha_range(),
                    snapshot.workdir.display(),
                    e
                );
                transition(&repo_id, DispatchState::Failed);
                return DispatchOutcome::Failed(e);
            }
        };

        // Read before updating; the notifier writes the file on its first run.
        let state = mirror_state(&directory, &snapshot.state_file);
        if !state.initialized {
            info!("Mirror '{}' has no notifier state yet", directory.display());
        }

        if let Err(e) = update_mirror(&remote_url, &directory, snapshot.mirror_timeout).await {
            warn!(
                "Mirror update for '{}' from {} failed, notifying with existing state: {}",
                repo_id, remote_url, e
            );
        }
        transition(&repo_id, DispatchState::Mirrored);

        let args = build_args(
            &snapshot.base_options,
            &rule.options,
            &event,
            &state,
            snapshot.silent_init,
        );
        transition(&repo_id, DispatchState::ArgsBuilt);

        let result = Notifier::from_snapshot(&snapshot)
            .invoke(&directory, &args)
            .await;
        transition(&repo_id, DispatchState::Notified);

        match result {
            Ok(_) => {
                info!(
                    "Notified for '{}' ({}) from '{}'",
                    repo_id,
                    event.sha_range(),
                    directory.display()
                );
                transition(&repo_id, DispatchState::Done);
                DispatchOutcome::Done { directory, args }
            }
            Err(e) => {
                error!(
                    "Dispatch for '{}' ({}) failed in '{}' with args [{}]: {}",
                    repo_id,
                    event.sha_range(),
                    directory.display(),
                    args,
                    e
                );
                transition(&repo_id, DispatchState::Failed);
                DispatchOutcome::Failed(e)
            }
        }
    }

    pub async fn dispatch(&self, event: PushEvent) -> DispatchOutcome {
        match self.plan(event) {
            Some(plan) => self.execute(plan).await,
            None => DispatchOutcome::NoMatch,
        }
    }
}

fn transition(repo_id: &str, state: DispatchState) {
    debug!("Dispatch {}: {:?}", repo_id, state);
}
