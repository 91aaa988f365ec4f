//! Local bare mirrors, one per `owner/repo`, laid out as
//! `<workdir>/<owner>/<repo>/`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{NotifyError, Result};

/// Where a mirror lives and whether the notifier has completed a run in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorState {
    pub path: PathBuf,
    /// The notifier's state file is present
    pub initialized: bool,
}

/// Reads the mirror state from the presence of `state_file`.
pub fn mirror_state(dir: &Path, state_file: &str) -> MirrorState {
    MirrorState {
        path: dir.to_path_buf(),
        initialized: dir.join(state_file).is_file(),
    }
}

pub struct MirrorManager {
    workdir: PathBuf,
}

impl MirrorManager {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn mirror_dir(&self, owner: &str, repo_name: &str) -> PathBuf {
        self.workdir.join(owner).join(repo_name)
    }

    /// Creates the mirror directory if needed. Existing contents are left alone.
    pub async fn ensure_mirror(&self, owner: &str, repo_name: &str) -> Result<PathBuf> {
        let dir = self.mirror_dir(owner, repo_name);
        if !dir.is_dir() {
            info!("Creating mirror directory {}", dir.display());
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(dir)
    }
}

/// Refresh the bare mirror in `dir` from `remote_url`.
///
/// Branches and tags are force-fetched onto the local refs of the same name;
/// refs deleted upstream are kept. A failing step is logged and the
/// remaining steps still run. Returns the first failure, if any.
///
/// Each git step is killed once `step_timeout` elapses and counts as failed.
pub async fn update_mirror(
    remote_url: &str,
    dir: &Path,
    step_timeout: Option<Duration>,
) -> Result<()> {
    let steps: [&[&str]; 4] = [
        &["init", "--bare", "--quiet"],
        &[
            "fetch",
            "--force",
            "--update-head-ok",
            remote_url,
            "+refs/heads/*:refs/heads/*",
        ],
        &[
            "fetch",
            "--force",
            "--update-head-ok",
            remote_url,
            "+refs/tags/*:refs/tags/*",
        ],
        &["remote", "update"],
    ];

    let mut first_error = None;
    for args in steps {
        if let Err(e) = run_git(dir, args, step_timeout).await {
            error!("Mirror update step failed in '{}': {}", dir.display(), e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn run_git(dir: &Path, args: &[&str], limit: Option<Duration>) -> Result<String> {
    let command = format!("git {}", args.join(" "));
    info!("Running (cwd = '{}'): {}", dir.display(), command);

    let run = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .output();

    let output = match limit {
        Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
            NotifyError::MirrorUpdateFailed {
                operation: command.clone(),
                message: format!("timed out after {}s", limit.as_secs()),
            }
        })?,
        None => run.await,
    };

    let output = output.map_err(|e| NotifyError::MirrorUpdateFailed {
        operation: command.clone(),
        message: format!("failed to start: {}", e),
    })?;

    if !output.status.success() {
        return Err(NotifyError::MirrorUpdateFailed {
            operation: command,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    debug!("{} output:\n{}", command, stdout);
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    const LIMIT: Option<Duration> = Some(Duration::from_secs(60));

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .current_dir(dir)
            .args(["-c", "user.name=Test", "-c", "user.email=test@test.com"])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    /// Upstream repo with a `main` branch, a `feature` branch and a `v1` tag.
    fn create_upstream(root: &Path) -> PathBuf {
        let upstream = root.join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "--quiet"]);
        git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(upstream.join("README.md"), "# Test").unwrap();
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "--quiet", "-m", "Initial commit"]);
        git(&upstream, &["branch", "feature"]);
        git(&upstream, &["tag", "v1"]);
        upstream
    }

    fn refs(dir: &Path) -> String {
        git(dir, &["for-each-ref", "--format=%(objectname) %(refname)"])
    }

    #[tokio::test]
    async fn ensure_mirror_creates_nested_directory() {
        let temp = TempDir::new().unwrap();
        let manager = MirrorManager::new(temp.path().join("work"));

        let dir = manager.ensure_mirror("acme", "widgets").await.unwrap();

        assert_eq!(dir, temp.path().join("work").join("acme").join("widgets"));
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn ensure_mirror_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let manager = MirrorManager::new(temp.path());

        let first = manager.ensure_mirror("acme", "widgets").await.unwrap();
        std::fs::write(first.join("git-notifier.dat"), "state").unwrap();
        let second = manager.ensure_mirror("acme", "widgets").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(second.join("git-notifier.dat")).unwrap(),
            "state"
        );
    }

    #[test]
    fn state_file_marks_mirror_initialized() {
        let temp = TempDir::new().unwrap();
        assert!(!mirror_state(temp.path(), "git-notifier.dat").initialized);

        std::fs::write(temp.path().join("git-notifier.dat"), "").unwrap();
        let state = mirror_state(temp.path(), "git-notifier.dat");
        assert!(state.initialized);
        assert_eq!(state.path, temp.path());
    }

    #[tokio::test]
    async fn update_mirror_fetches_branches_and_tags() {
        let temp = TempDir::new().unwrap();
        let upstream = create_upstream(temp.path());
        let manager = MirrorManager::new(temp.path().join("work"));
        let dir = manager.ensure_mirror("acme", "widgets").await.unwrap();

        update_mirror(upstream.to_str().unwrap(), &dir, LIMIT).await.unwrap();

        let mirrored = refs(&dir);
        assert!(mirrored.contains("refs/heads/main"));
        assert!(mirrored.contains("refs/heads/feature"));
        assert!(mirrored.contains("refs/tags/v1"));
        let head = git(&upstream, &["rev-parse", "main"]);
        assert_eq!(git(&dir, &["rev-parse", "main"]), head);
    }

    #[tokio::test]
    async fn update_mirror_twice_is_stable() {
        let temp = TempDir::new().unwrap();
        let upstream = create_upstream(temp.path());
        let dir = MirrorManager::new(temp.path().join("work"))
            .ensure_mirror("acme", "widgets")
            .await
            .unwrap();

        update_mirror(upstream.to_str().unwrap(), &dir, LIMIT).await.unwrap();
        let first = refs(&dir);
        update_mirror(upstream.to_str().unwrap(), &dir, LIMIT).await.unwrap();

        assert_eq!(refs(&dir), first);
    }

    #[tokio::test]
    async fn update_mirror_follows_rewrites_and_keeps_deleted_branches() {
        let temp = TempDir::new().unwrap();
        let upstream = create_upstream(temp.path());
        let dir = MirrorManager::new(temp.path().join("work"))
            .ensure_mirror("acme", "widgets")
            .await
            .unwrap();
        update_mirror(upstream.to_str().unwrap(), &dir, LIMIT).await.unwrap();

        std::fs::write(upstream.join("README.md"), "# Amended").unwrap();
        git(&upstream, &["commit", "--quiet", "--amend", "-a", "-m", "Rewritten"]);
        git(&upstream, &["branch", "-D", "feature"]);
        update_mirror(upstream.to_str().unwrap(), &dir, LIMIT).await.unwrap();

        assert_eq!(
            git(&dir, &["rev-parse", "main"]),
            git(&upstream, &["rev-parse", "main"])
        );
        assert!(refs(&dir).contains("refs/heads/feature"));
    }

    #[tokio::test]
    async fn unreachable_remote_fails_but_leaves_a_bare_repo() {
        let temp = TempDir::new().unwrap();
        let dir = MirrorManager::new(temp.path())
            .ensure_mirror("acme", "widgets")
            .await
            .unwrap();
        let missing = temp.path().join("does-not-exist");

        let err = update_mirror(missing.to_str().unwrap(), &dir, LIMIT)
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::MirrorUpdateFailed { ref operation, .. } if operation.starts_with("git fetch")));
        assert!(dir.join("HEAD").is_file());
    }

    #[tokio::test]
    async fn stalled_remote_is_cut_off_by_step_timeout() {
        let temp = TempDir::new().unwrap();
        let dir = MirrorManager::new(temp.path())
            .ensure_mirror("acme", "widgets")
            .await
            .unwrap();

        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let url = format!("git://127.0.0.1:{}/acme/widgets", port);

        let result = tokio::time::timeout(
            Duration::from_secs(30),
            update_mirror(&url, &dir, Some(Duration::from_secs(1))),
        )
        .await
        .expect("mirror update should give up on a stalled remote");

        match result {
            Err(NotifyError::MirrorUpdateFailed { operation, message }) => {
                assert!(operation.starts_with("git fetch"));
                assert!(message.contains("timed out"));
            }
            other => panic!("expected a timed out fetch, got {:?}", other),
        }
        assert!(dir.join("HEAD").is_file());
    }
}
