//! Device transports.
//!
//! Drivers reach devices only through [`DeviceTransport`]: a single SNMP GET
//! and a single SCP download. [`CommandTransport`] implements both by
//! running the net-snmp `snmpget` and OpenSSH `scp` binaries under
//! `tokio::process::Command`, so polls never block the runtime.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use confvault_core::HostDescriptor;
use serde::Deserialize;
use tokio::process::Command;

/// Transport-level failure, before the host identity is attached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    Failed(String),
}

/// The narrow capability drivers need from the network.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Fetch one SNMP object as a display string.
    async fn snmp_get(&self, host: &HostDescriptor, oid: &str) -> Result<String, TransportError>;

    /// Download a file from the device over SCP.
    async fn scp_download(
        &self,
        host: &HostDescriptor,
        remote_path: &str,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Paths to the external binaries used by [`CommandTransport`].
#[derive(Debug, Clone, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_snmpget")]
    pub snmpget: String,

    #[serde(default = "default_scp")]
    pub scp: String,

    #[serde(default = "default_sshpass")]
    pub sshpass: String,

    #[serde(default = "default_dig")]
    pub dig: String,

    #[serde(default = "default_git")]
    pub git: String,
}

fn default_snmpget() -> String {
    "snmpget".to_string()
}

fn default_scp() -> String {
    "scp".to_string()
}

fn default_sshpass() -> String {
    "sshpass".to_string()
}

fn default_dig() -> String {
    "dig".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            snmpget: default_snmpget(),
            scp: default_scp(),
            sshpass: default_sshpass(),
            dig: default_dig(),
            git: default_git(),
        }
    }
}

/// Slack added on top of `timeout * (retries + 1)` before a child process
/// is killed.
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

/// Transport backed by external command-line tools.
pub struct CommandTransport {
    tools: ToolPaths,
}

impl CommandTransport {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    fn deadline(host: &HostDescriptor) -> Duration {
        let attempts = u64::from(host.snmp.retries) + 1;
        Duration::from_secs(host.snmp.timeout_secs.saturating_mul(attempts)) + DEADLINE_GRACE
    }
}

/// Run a child process to completion, killing it once `deadline` passes.
pub(crate) async fn run_with_deadline(
    mut cmd: Command,
    program: &str,
    deadline: Duration,
) -> Result<Output, TransportError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    match tokio::time::timeout(deadline, cmd.output()).await {
        Err(_) => Err(TransportError::Timeout),
        Ok(Err(e)) => Err(TransportError::Failed(format!("cannot run {program}: {e}"))),
        Ok(Ok(output)) => Ok(output),
    }
}

/// Map a failed tool invocation onto a transport error by its stderr.
fn classify_failure(output: &Output) -> TransportError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let lower = stderr.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") {
        TransportError::Timeout
    } else if lower.contains("unknown host")
        || lower.contains("could not resolve")
        || lower.contains("connection refused")
        || lower.contains("no route to host")
        || lower.contains("network is unreachable")
    {
        TransportError::Unreachable(stderr)
    } else {
        TransportError::Failed(format!(
            "exit code {}: {stderr}",
            output.status.code().unwrap_or(-1)
        ))
    }
}

/// Strip the quotes net-snmp puts around string values.
fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[async_trait]
impl DeviceTransport for CommandTransport {
    async fn snmp_get(&self, host: &HostDescriptor, oid: &str) -> Result<String, TransportError> {
        let snmp = &host.snmp;
        let mut cmd = Command::new(&self.tools.snmpget);
        cmd.args(["-v", snmp.version.as_arg()])
            .arg("-c")
            .arg(&snmp.community)
            .arg("-t")
            .arg(snmp.timeout_secs.to_string())
            .arg("-r")
            .arg(snmp.retries.to_string())
            .args(["-O", "qv"])
            .arg(format!("{}:{}", host.hostname, snmp.port))
            .arg(oid);

        tracing::debug!(host = %host.hostname, oid, "SNMP GET");

        let output = run_with_deadline(cmd, &self.tools.snmpget, Self::deadline(host)).await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(unquote(&stdout).to_string())
    }

    async fn scp_download(
        &self,
        host: &HostDescriptor,
        remote_path: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let workdir = tempfile::tempdir()
            .map_err(|e| TransportError::Failed(format!("cannot create temp dir: {e}")))?;
        let local = workdir.path().join("download");

        let source = match &host.username {
            Some(user) => format!("{user}@{}:{remote_path}", host.hostname),
            None => format!("{}:{remote_path}", host.hostname),
        };
        let connect_timeout = format!("ConnectTimeout={}", host.snmp.timeout_secs.max(1));

        // With a password, scp runs under sshpass which reads it from SSHPASS.
        let (program, mut cmd) = match &host.password {
            Some(password) => {
                let mut cmd = Command::new(&self.tools.sshpass);
                cmd.env("SSHPASS", password).arg("-e").arg(&self.tools.scp);
                (&self.tools.sshpass, cmd)
            }
            None => {
                let mut cmd = Command::new(&self.tools.scp);
                cmd.args(["-o", "BatchMode=yes"]);
                (&self.tools.scp, cmd)
            }
        };
        cmd.arg("-q")
            .arg("-o")
            .arg(&connect_timeout)
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg(&source)
            .arg(&local);

        tracing::debug!(host = %host.hostname, remote_path, "SCP download");

        let output = run_with_deadline(cmd, program, Self::deadline(host)).await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }

        tokio::fs::read(&local)
            .await
            .map_err(|e| TransportError::Failed(format!("downloaded file unreadable: {e}")))
    }
}
