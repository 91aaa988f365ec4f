//! Runs the external notifier tool inside a mirror directory

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

use crate::args::NotifierArgs;
use crate::config::ConfigSnapshot;
use crate::error::{NotifyError, Result};

pub struct Notifier {
    tool: PathBuf,
    timeout: Option<Duration>,
}

impl Notifier {
    pub fn new(tool: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            tool: tool.into(),
            timeout,
        }
    }

    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self::new(&snapshot.tool, snapshot.tool_timeout)
    }

    /// Run the tool with `dir` as its working directory.
    ///
    /// Only the child's working directory is set; this process's own stays
    /// where it was. The child is killed if the timeout expires. Returns
    /// the tool's stdout.
    pub async fn invoke(&self, dir: &Path, args: &NotifierArgs) -> Result<String> {
        let argv = args.to_argv();
        info!(
            "Running (cwd = '{}'): {} {}",
            dir.display(),
            self.tool.display(),
            argv.join(" ")
        );

        let run = Command::new(&self.tool)
            .current_dir(dir)
            .args(&argv)
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(output) => output,
                Err(_) => {
                    error!(
                        "Notifier timed out after {:?} in '{}' with args: {}",
                        limit,
                        dir.display(),
                        args
                    );
                    return Err(NotifyError::NotifierTimeout {
                        secs: limit.as_secs(),
                    });
                }
            },
            None => run.await,
        };

        let output = output.map_err(|e| {
            error!(
                "Notifier '{}' failed to start in '{}' with args: {}: {}",
                self.tool.display(),
                dir.display(),
                args,
                e
            );
            NotifyError::NotifierFailed(format!(
                "failed to start '{}': {}",
                self.tool.display(),
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "Notifier exited with {} in '{}' with args: {}\n{}",
                output.status,
                dir.display(),
                args,
                stderr
            );
            return Err(NotifyError::NotifierFailed(format!(
                "'{}' exited with {}: {}",
                self.tool.display(),
                output.status,
                stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
