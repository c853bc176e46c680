//! OpenSSH-backed remote executor
//!
//! One `execute` call holds one authenticated connection: an `ssh` master
//! process is started on a private control socket, every command is
//! multiplexed over it, and the master is shut down afterwards. The private
//! key and the socket live in a temporary directory that is removed when the
//! session is dropped.

use super::{CommandOutcome, RemoteExecutor, RemoteTarget};
use crate::config::SshConfig;
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Extra time granted to the master beyond the TCP connect timeout
const HANDSHAKE_GRACE: Duration = Duration::from_secs(20);
const MASTER_POLL: Duration = Duration::from_millis(200);

/// Remote executor driving the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshExecutor {
    /// ssh client binary
    binary: String,
    /// TCP connect timeout
    connect_timeout: Duration,
    /// Per-command timeout
    command_timeout: Duration,
}

impl SshExecutor {
    /// Create an executor from configuration
    pub fn new(config: &SshConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
            command_timeout: Duration::from_secs(config.command_timeout_secs.max(1)),
        }
    }

    /// Options shared by the master and every multiplexed command
    fn base_args(&self, key_path: &Path, control_path: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            key_path.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
        ]
    }

    async fn open(&self, target: &RemoteTarget) -> Result<SshSession> {
        let dir = tempfile::Builder::new()
            .prefix("cf-ssh-")
            .tempdir()
            .map_err(|e| ForgeError::Connection(format!("cannot create session dir: {}", e)))?;
        let key_path = dir.path().join("id");
        write_private_key(&key_path, &target.private_key).await?;
        let control_path = dir.path().join("ctl");

        let destination = format!("{}@{}", target.user, target.address);
        let args = self.base_args(&key_path, &control_path);

        let mut master = Command::new(&self.binary)
            .args(&args)
            .args(["-M", "-N", "-o", "ControlMaster=yes"])
            .arg(&destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ForgeError::Connection(format!("failed to start {}: {}", self.binary, e)))?;

        let mut session = SshSession {
            binary: self.binary.clone(),
            args,
            destination,
            control_path,
            master: None,
            _dir: dir,
        };

        let deadline = tokio::time::Instant::now() + self.connect_timeout + HANDSHAKE_GRACE;
        loop {
            let exited = master
                .try_wait()
                .map_err(|e| master_lost(&session.destination, e))?;
            if let Some(status) = exited {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return Err(ForgeError::Connection(format!(
                    "ssh to {} exited with {}: {}",
                    session.destination,
                    status,
                    stderr.trim()
                )));
            }

            if session.control_ready().await {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = master.kill().await;
                return Err(ForgeError::Connection(format!(
                    "ssh to {} did not authenticate within {:?}",
                    session.destination,
                    self.connect_timeout + HANDSHAKE_GRACE
                )));
            }

            tokio::time::sleep(MASTER_POLL).await;
        }

        session.master = Some(master);
        Ok(session)
    }
}

/// A master process that can no longer be polled counts as a lost connection
fn master_lost(destination: &str, err: std::io::Error) -> ForgeError {
    ForgeError::Connection(format!("lost ssh master for {}: {}", destination, err))
}

async fn write_private_key(path: &Path, key: &str) -> Result<()> {
    let mut content = key.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    tokio::fs::write(path, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, permissions).await?;
    }

    Ok(())
}

/// One authenticated connection
struct SshSession {
    binary: String,
    args: Vec<String>,
    destination: String,
    control_path: PathBuf,
    master: Option<Child>,
    _dir: TempDir,
}

impl SshSession {
    async fn control_ready(&self) -> bool {
        if !self.control_path.exists() {
            return false;
        }
        Command::new(&self.binary)
            .args(&self.args)
            .args(["-O", "check"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn master_alive(&mut self) -> bool {
        match self.master.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutcome> {
        debug!("[SSH] Executing on {}: {}", self.destination, command);

        let output = Command::new(&self.binary)
            .args(&self.args)
            .args(["-o", "ControlMaster=no"])
            .arg(&self.destination)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, output)
            .await
            .map_err(|_| ForgeError::Timeout(format!("'{}' exceeded {:?}", command, timeout)))?
            .map_err(|e| ForgeError::Connection(format!("failed to run {}: {}", self.binary, e)))?;

        let exit_status = output.status.code().unwrap_or(-1);
        // 255 is ssh's own failure code; it only means "command failed" while
        // the master is still up.
        if exit_status == 255 && !self.master_alive() {
            return Err(ForgeError::Connection(format!(
                "connection to {} dropped",
                self.destination
            )));
        }

        Ok(CommandOutcome {
            command: command.to_string(),
            exit_status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn close(mut self) {
        let _ = Command::new(&self.binary)
            .args(&self.args)
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Some(mut master) = self.master.take() {
            if tokio::time::timeout(Duration::from_secs(5), master.wait())
                .await
                .is_err()
            {
                let _ = master.kill().await;
            }
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, target: &RemoteTarget, commands: &[String]) -> Result<Vec<CommandOutcome>> {
        let mut session = self.open(target).await?;
        let mut outcomes = Vec::with_capacity(commands.len());

        for command in commands {
            match session.run(command, self.command_timeout).await {
                Ok(outcome) => {
                    if !outcome.success() {
                        debug!(
                            "[SSH] '{}' on {} exited {}: {}",
                            command,
                            target.address,
                            outcome.exit_status,
                            outcome.stderr.trim()
                        );
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    warn!("Aborting session to {}: {}", target.address, e);
                    session.close().await;
                    return Err(e);
                }
            }
        }

        session.close().await;
        Ok(outcomes)
    }
}
