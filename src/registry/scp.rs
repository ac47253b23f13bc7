//! Remote-copy transport
//!
//! Moves image trees to and from a directory on another host with `scp -r`,
//! using `ssh` to publish pushed trees. A push lands in a hidden staging
//! directory next to its destination and is moved into place with a single
//! `mv -T`, so the remote never shows a partial image under its name.

use crate::config::TransferConfig;
use crate::error::{RamaError, Result};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Prefix of remote staging directories
pub const REMOTE_STAGING_PREFIX: &str = ".rama-staging-";

/// Exit status of the remote publish step when the destination exists
const EXISTS_STATUS: i32 = 17;

/// scp/ssh based transport
#[derive(Debug, Clone)]
pub struct ScpTransport {
    scp_program: String,
    ssh_program: String,
    timeout: Duration,
}

impl ScpTransport {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            scp_program: config.scp_program.clone(),
            ssh_program: config.ssh_program.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// Copy the local tree `src` to `<path>/<name>` on `host`
    pub async fn push(
        &self,
        src: &Path,
        host: &str,
        path: &str,
        name: &str,
        overwrite: bool,
    ) -> Result<()> {
        let staging = format!(
            "{}/{}{}",
            path,
            REMOTE_STAGING_PREFIX,
            uuid::Uuid::new_v4().simple()
        );
        let dest = format!("{}/{}", path, name);

        let src_arg = src.to_string_lossy().into_owned();
        if let Err(e) = self
            .run(
                &self.scp_program,
                &["-r", "-q", &src_arg, &format!("{}:{}", host, staging)],
            )
            .await
        {
            // A failed or interrupted copy may still have created part of the tree
            self.discard_staging(host, &staging).await;
            return Err(e);
        }

        let publish = if overwrite {
            format!(
                "rm -rf -- {dest} && mv -T -- {staging} {dest}",
                dest = shell_quote(&dest),
                staging = shell_quote(&staging)
            )
        } else {
            format!(
                "if test -e {dest}; then exit {status}; fi; mv -T -- {staging} {dest}",
                dest = shell_quote(&dest),
                staging = shell_quote(&staging),
                status = EXISTS_STATUS
            )
        };

        let status = self.status(&self.ssh_program, &[host, &publish]).await;
        let exists = matches!(&status, Ok((s, _)) if s.code() == Some(EXISTS_STATUS));
        let result = status.and_then(|(status, stderr)| check(&self.ssh_program, status, &stderr));
        if result.is_err() {
            self.discard_staging(host, &staging).await;
        }
        if exists {
            return Err(RamaError::ImageExists(name.to_string()));
        }
        result
    }

    /// Best-effort removal of a remote staging directory
    async fn discard_staging(&self, host: &str, staging: &str) {
        let cleanup = format!("rm -rf -- {}", shell_quote(staging));
        if let Err(e) = self.run(&self.ssh_program, &[host, &cleanup]).await {
            warn!(host, staging, error = %e, "failed to remove remote staging directory");
        }
    }

    /// Copy `<path>/<name>` on `host` to the local path `dest`, which must not
    /// exist yet
    pub async fn pull(&self, host: &str, path: &str, name: &str, dest: &Path) -> Result<()> {
        let dest_arg = dest.to_string_lossy().into_owned();
        self.run(
            &self.scp_program,
            &["-r", "-q", &format!("{}:{}/{}", host, path, name), &dest_arg],
        )
        .await
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let (status, stderr) = self.status(program, args).await?;
        check(program, status, &stderr)
    }

    /// Run `program` to completion within the timeout; returns its exit
    /// status and stderr
    async fn status(&self, program: &str, args: &[&str]) -> Result<(ExitStatus, String)> {
        debug!(program, ?args, "running transfer command");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RamaError::Transfer(format!("Failed to start {}: {}", program, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                RamaError::Transfer(format!("{} timed out after {:?}", program, self.timeout))
            })?
            .map_err(|e| RamaError::Transfer(format!("{} failed: {}", program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status, stderr))
    }
}

fn check(program: &str, status: ExitStatus, stderr: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(RamaError::Transfer(format!(
        "{} exited with {}: {}",
        program, status, stderr
    )))
}

/// Quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
