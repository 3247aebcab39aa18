//! Error types for E2E testing

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Provisioning command timed out after {0:?}")]
    ProvisioningTimeout(Duration),

    #[error("User creation failed: {0}")]
    UserCreation(String),

    #[error("Session injection rejected: {0}")]
    SessionInjection(String),

    #[error("Application never reported ready at {step} (timeout: {timeout_ms} ms, last url: {last_url}): {reason}")]
    ReadinessTimeout {
        step: String,
        timeout_ms: u64,
        last_url: String,
        reason: String,
        screenshot: Option<PathBuf>,
    },

    #[error("Assertion timed out at {step} (timeout: {timeout_ms} ms, last url: {last_url}): {reason}")]
    AssertionTimeout {
        step: String,
        timeout_ms: u64,
        last_url: String,
        reason: String,
        screenshot: Option<PathBuf>,
    },

    #[error("Step failed: {step} - {reason} (last url: {last_url})")]
    StepFailed {
        step: String,
        reason: String,
        last_url: String,
        screenshot: Option<PathBuf>,
    },

    #[error(
        "Scenario '{name}' exceeded {timeout:?} at {} (last url: {})",
        .step.as_deref().unwrap_or("unknown step"),
        .last_url.as_deref().unwrap_or("unknown")
    )]
    ScenarioTimeout {
        name: String,
        timeout: Duration,
        /// Step the script was on when its watchdog fired
        step: Option<String>,
        last_url: Option<String>,
        screenshot: Option<PathBuf>,
    },

    #[error("Invalid scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl E2eError {
    pub fn invalid_scenario(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidScenario {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Stable label used in result reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provisioning(_) => "provisioning_error",
            Self::ProvisioningTimeout(_) => "provisioning_timeout",
            Self::UserCreation(_) => "user_creation_error",
            Self::SessionInjection(_) => "session_injection_error",
            Self::ReadinessTimeout { .. } => "readiness_timeout",
            Self::AssertionTimeout { .. } => "assertion_timeout",
            Self::StepFailed { .. } => "step_failed",
            Self::ScenarioTimeout { .. } => "scenario_timeout",
            Self::InvalidScenario { .. } => "invalid_scenario",
            Self::ServerStartup(_) | Self::ServerHealthCheck(_) => "server_error",
            Self::PlaywrightNotFound | Self::Playwright(_) => "playwright_error",
            Self::SpecParse(_) | Self::Yaml(_) => "parse_error",
            Self::Config(_) => "config_error",
            Self::Io(_) | Self::Json(_) | Self::Http(_) | Self::Url(_) => "internal_error",
        }
    }

    /// Last URL the browser was on when the scenario failed, if known
    pub fn last_url(&self) -> Option<&str> {
        match self {
            Self::ReadinessTimeout { last_url, .. }
            | Self::AssertionTimeout { last_url, .. }
            | Self::StepFailed { last_url, .. } => Some(last_url),
            Self::ScenarioTimeout { last_url, .. } => last_url.as_deref(),
            _ => None,
        }
    }

    pub fn screenshot(&self) -> Option<&PathBuf> {
        match self {
            Self::ReadinessTimeout { screenshot, .. }
            | Self::AssertionTimeout { screenshot, .. }
            | Self::StepFailed { screenshot, .. }
            | Self::ScenarioTimeout { screenshot, .. } => screenshot.as_ref(),
            _ => None,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
