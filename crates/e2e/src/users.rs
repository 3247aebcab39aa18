//! Throwaway users for scenarios that log in through the UI

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::command::{describe_output, run_one_shot, CommandFailure, CommandSpec};
use crate::error::{E2eError, E2eResult};

/// Literal the user-creation command prints on success
pub const USER_CREATED_MARKER: &str = "User created successfully.";

const MAX_USERNAME_LEN: usize = 16;

/// Credentials and profile for a freshly created user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub birthdate: String,
    pub country: String,
}

impl TestUser {
    /// Generate a user that no other scenario will collide with
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let username: String = format!("e2e{}", id).chars().take(MAX_USERNAME_LEN).collect();

        Self {
            email: format!("{}@example.com", username),
            username,
            password: Uuid::new_v4().simple().to_string(),
            full_name: "Test User".to_string(),
            birthdate: "1990-01-01".to_string(),
            country: "VE".to_string(),
        }
    }

    /// Template variables (`user.*`) exposed to scenario steps
    pub fn template_vars(&self) -> HashMap<String, String> {
        [
            ("user.username", &self.username),
            ("user.email", &self.email),
            ("user.password", &self.password),
            ("user.full_name", &self.full_name),
            ("user.birthdate", &self.birthdate),
            ("user.country", &self.country),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }

    fn to_args(&self) -> Vec<String> {
        [
            ("--username", &self.username),
            ("--email", &self.email),
            ("--password", &self.password),
            ("--full-name", &self.full_name),
            ("--birthdate", &self.birthdate),
            ("--country", &self.country),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value.clone()])
        .collect()
    }
}

/// Names of every template variable a [`TestUser`] provides
pub const USER_TEMPLATE_VARS: [&str; 6] = [
    "user.username",
    "user.email",
    "user.password",
    "user.full_name",
    "user.birthdate",
    "user.country",
];

#[async_trait]
pub trait UserCreator: Send + Sync {
    async fn create_user(&self, user: &TestUser) -> E2eResult<()>;
}

/// Creates users through the backend CLI
#[derive(Debug, Clone)]
pub struct CommandUserCreator {
    command: CommandSpec,
    timeout: Duration,
}

impl CommandUserCreator {
    pub fn new(command: CommandSpec, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl UserCreator for CommandUserCreator {
    async fn create_user(&self, user: &TestUser) -> E2eResult<()> {
        debug!("Creating user {} via: {}", user.username, self.command);

        let output = run_one_shot(&self.command, &user.to_args(), self.timeout)
            .await
            .map_err(|failure| match failure {
                CommandFailure::TimedOut(d) => E2eError::ProvisioningTimeout(d),
                other => E2eError::UserCreation(format!("{}: {}", self.command, other)),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || !stdout.contains(USER_CREATED_MARKER) {
            return Err(E2eError::UserCreation(describe_output(&output)));
        }

        info!("Created user {}", user.username);
        Ok(())
    }
}
