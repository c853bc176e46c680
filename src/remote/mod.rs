//! Remote command execution
//!
//! A [`RemoteExecutor`] opens one authenticated session to a host and runs
//! an ordered list of shell commands, reporting each command's exit status
//! and output. Failing to open the session is a [`ForgeError::Connection`];
//! a command exiting non-zero is not an error at this level and is left to
//! the caller to judge.

pub mod retry;
pub mod ssh;

pub use retry::RetryPolicy;
pub use ssh::SshExecutor;

use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Command used to probe whether a host accepts sessions
pub const READY_PROBE: &str = "echo 'SSH Ready'";

/// Host to run commands on
#[derive(Clone)]
pub struct RemoteTarget {
    /// Address to connect to
    pub address: String,
    /// Login account
    pub user: String,
    /// PEM private key for authentication
    pub private_key: String,
}

impl RemoteTarget {
    /// Create a new target
    pub fn new(address: &str, user: &str, private_key: &str) -> Self {
        Self {
            address: address.to_string(),
            user: user.to_string(),
            private_key: private_key.to_string(),
        }
    }
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}

/// Result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Command text
    pub command: String,
    /// Exit status, -1 when killed by a signal
    pub exit_status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutcome {
    /// Check if the command exited zero
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Runs command sequences on remote hosts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `commands` in order over one session
    ///
    /// Every command runs even if an earlier one fails.
    async fn execute(&self, target: &RemoteTarget, commands: &[String]) -> Result<Vec<CommandOutcome>>;
}

/// Poll `target` until it accepts a session
///
/// Returns the number of attempts it took. Exhausting the policy's attempt
/// cap yields [`ForgeError::Timeout`].
pub async fn wait_for_ready(
    executor: &dyn RemoteExecutor,
    target: &RemoteTarget,
    policy: &RetryPolicy,
) -> Result<u32> {
    let probe = [READY_PROBE.to_string()];

    for attempt in 1..=policy.max_attempts {
        match executor.execute(target, &probe).await {
            Ok(_) => {
                debug!("{:?} accepted a session after {} attempt(s)", target, attempt);
                return Ok(attempt);
            }
            Err(e) => {
                info!(
                    "Waiting for {} to accept connections... ({}/{}): {}",
                    target.address, attempt, policy.max_attempts, e
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }

    Err(ForgeError::Timeout(format!(
        "SSH connection to {} timed out after {} attempts",
        target.address, policy.max_attempts
    )))
}
