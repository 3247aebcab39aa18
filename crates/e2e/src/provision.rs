//! Out-of-band session provisioning
//!
//! Scenarios that start authenticated never go through the login form.
//! Instead a trusted backend command mints a session and prints it as JSON:
//!
//! ```text
//! $ cargo run --package drive-cli --release --features test-utils create-test-session
//! {"token": "..."}
//! ```
//!
//! A failed or hung provisioning command is an environment defect, so it is
//! reported once and never retried.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{describe_output, run_one_shot, CommandFailure, CommandSpec};
use crate::error::{E2eError, E2eResult};

/// Opaque credential for one authenticated identity
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> E2eResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(E2eError::Provisioning("session token is empty".to_string()));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Source of fresh authenticated sessions
#[async_trait]
pub trait SessionProvisioner: Send + Sync {
    /// Mint a session that belongs to the caller alone
    async fn provision_session(&self) -> E2eResult<SessionToken>;
}

#[derive(Debug, Deserialize)]
struct SessionOutput {
    token: String,
}

/// Extract the token from the provisioning command's stdout
pub fn parse_session_output(stdout: &[u8]) -> E2eResult<SessionToken> {
    let text = String::from_utf8_lossy(stdout);
    let parsed: SessionOutput = serde_json::from_str(text.trim()).map_err(|e| {
        E2eError::Provisioning(format!("unparsable session output ({}): {}", e, text.trim()))
    })?;
    SessionToken::new(parsed.token)
}

/// Provisions sessions by running a one-shot command
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    command: CommandSpec,
    timeout: Duration,
}

impl CommandProvisioner {
    pub fn new(command: CommandSpec, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

#[async_trait]
impl SessionProvisioner for CommandProvisioner {
    async fn provision_session(&self) -> E2eResult<SessionToken> {
        debug!("Provisioning session via: {}", self.command);

        let output = run_one_shot(&self.command, &[], self.timeout)
            .await
            .map_err(|failure| match failure {
                CommandFailure::TimedOut(d) => E2eError::ProvisioningTimeout(d),
                other => E2eError::Provisioning(format!("{}: {}", self.command, other)),
            })?;

        if !output.status.success() {
            return Err(E2eError::Provisioning(format!(
                "{} exited unsuccessfully\n{}",
                self.command,
                describe_output(&output)
            )));
        }

        let token = parse_session_output(&output.stdout)?;
        info!("Provisioned a fresh session");
        Ok(token)
    }
}
