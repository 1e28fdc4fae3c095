pub mod cmd;

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to spawn ssh client for {host}: {source}")]
    Spawn {
        host: String,
        source: std::io::Error,
    },
    #[error("host unreachable: {host}: {detail}")]
    Unreachable { host: String, detail: String },
    #[error("command failed on {host} (exit {status}): {command}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self::default()
    }
}

/// Seam between the session and the actual ssh client, so tests can record
/// commands and script outputs without a network.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        host: &str,
        command: &str,
        forward_agent: bool,
    ) -> Result<CommandOutput, RemoteError>;
}

/// Spawns the system ssh client. Agent forwarding (`-A`) lets a nested hop
/// authenticate without key material landing on the first host.
pub struct SshRunner {
    user: Option<String>,
    key_file: Option<PathBuf>,
}

impl SshRunner {
    pub fn new(user: Option<String>, key_file: Option<PathBuf>) -> Self {
        Self { user, key_file }
    }
}

impl CommandRunner for SshRunner {
    fn run(
        &self,
        host: &str,
        command: &str,
        forward_agent: bool,
    ) -> Result<CommandOutput, RemoteError> {
        let mut ssh = Command::new("ssh");
        ssh.arg("-o").arg("StrictHostKeyChecking=no");
        if forward_agent {
            ssh.arg("-A");
        }
        if let Some(key) = &self.key_file {
            ssh.arg("-i").arg(key);
        }
        let target = match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        ssh.arg(target).arg(command);

        let output = ssh.output().map_err(|source| RemoteError::Spawn {
            host: host.to_string(),
            source,
        })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}

/// Executes shell commands on one named host. Calls are synchronous and
/// block until the remote command terminates.
#[derive(Clone)]
pub struct RemoteSession {
    host: String,
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
}

impl RemoteSession {
    pub fn new(host: impl Into<String>, runner: Arc<dyn CommandRunner>, dry_run: bool) -> Self {
        Self {
            host: host.into(),
            runner,
            dry_run,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Session against a different host sharing this session's runner and
    /// dry-run setting. Used to reach hypervisors discovered at runtime.
    pub fn for_host(&self, host: impl Into<String>) -> RemoteSession {
        RemoteSession {
            host: host.into(),
            runner: Arc::clone(&self.runner),
            dry_run: self.dry_run,
        }
    }

    /// Run `command` directly on the session host.
    pub fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.dispatch(command, false)
    }

    /// Run `command` on `compute_host`, hopping through the session host
    /// with the forwarded agent credential.
    pub fn execute_on_compute(
        &self,
        command: &str,
        compute_host: &str,
    ) -> Result<CommandOutput, RemoteError> {
        let nested = cmd::ssh_nested(compute_host, command);
        self.dispatch(&nested, true)
    }

    /// Run a command that itself opens a secondary connection (a pipe with
    /// an inner ssh); the agent is forwarded for the inner hop.
    pub fn execute_forwarded(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.dispatch(command, true)
    }

    fn dispatch(&self, command: &str, forward_agent: bool) -> Result<CommandOutput, RemoteError> {
        if self.dry_run {
            info!(host = %self.host, command, "dry-run: skipping remote command");
            return Ok(CommandOutput::success());
        }
        debug!(host = %self.host, command, forward_agent, "remote command");
        let output = self.runner.run(&self.host, command, forward_agent)?;
        // The ssh client reserves exit 255 for connection-level failures.
        if output.status == 255 {
            return Err(RemoteError::Unreachable {
                host: self.host.clone(),
                detail: output.stderr,
            });
        }
        if output.status != 0 {
            return Err(RemoteError::CommandFailed {
                host: self.host.clone(),
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, String, bool)>>,
        fail_with_status: Option<i32>,
    }

    impl CommandRunner for Recorder {
        fn run(
            &self,
            host: &str,
            command: &str,
            forward_agent: bool,
        ) -> Result<CommandOutput, RemoteError> {
            self.calls
                .lock()
                .expect("lock")
                .push((host.to_string(), command.to_string(), forward_agent));
            Ok(CommandOutput {
                stdout: "ok".to_string(),
                stderr: String::new(),
                status: self.fail_with_status.unwrap_or(0),
            })
        }
    }

    #[test]
    fn nested_execution_forwards_the_agent() {
        let recorder = Arc::new(Recorder::default());
        let session = RemoteSession::new("ctl-1", recorder.clone(), false);
        session
            .execute_on_compute("qemu-img commit /tmp/x", "hv-9")
            .expect("execute");

        let calls = recorder.calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        let (host, command, forwarded) = &calls[0];
        assert_eq!(host, "ctl-1");
        assert!(command.contains("ssh -o StrictHostKeyChecking=no hv-9"));
        assert!(command.contains("qemu-img commit /tmp/x"));
        assert!(*forwarded);
    }

    #[test]
    fn non_zero_exit_becomes_command_failed() {
        let recorder = Arc::new(Recorder {
            fail_with_status: Some(2),
            ..Recorder::default()
        });
        let session = RemoteSession::new("ctl-1", recorder, false);
        let err = session.execute("false").expect_err("must fail");
        assert!(matches!(
            err,
            RemoteError::CommandFailed { status: 2, .. }
        ));
    }

    #[test]
    fn ssh_exit_255_means_unreachable() {
        let recorder = Arc::new(Recorder {
            fail_with_status: Some(255),
            ..Recorder::default()
        });
        let session = RemoteSession::new("ctl-1", recorder, false);
        let err = session.execute("true").expect_err("must fail");
        assert!(matches!(err, RemoteError::Unreachable { .. }));
    }

    #[test]
    fn dry_run_issues_nothing() {
        let recorder = Arc::new(Recorder::default());
        let session = RemoteSession::new("ctl-1", recorder.clone(), true);
        let output = session.execute("rm -rf /").expect("dry run");
        assert_eq!(output, CommandOutput::success());
        assert!(recorder.calls.lock().expect("lock").is_empty());
    }
}
