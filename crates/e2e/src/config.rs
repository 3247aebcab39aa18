//! Harness configuration
//!
//! Resolution order: built-in defaults, then an optional YAML file, then
//! `DRIVE_E2E_*` environment variables. The runner binary applies its own
//! command-line flags last.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::CommandSpec;
use crate::error::{E2eError, E2eResult};
use crate::wait::ReadinessGate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// How to launch the application under test, when the harness owns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: CommandSpec,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    60_000
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Origin the application is served from
    pub base_url: String,

    /// Mints a session and prints `{"token": ...}`
    pub session_command: CommandSpec,

    /// Creates a user from `--username ... --country` flags
    pub user_command: CommandSpec,

    pub provisioning_timeout_ms: u64,

    /// Bound for every readiness and assertion poll
    pub expect_timeout_ms: u64,

    /// Bound for one whole scenario's browser process
    pub scenario_timeout_ms: u64,

    pub readiness: ReadinessGate,

    /// Scenarios run concurrently, each in its own browser context
    pub workers: usize,

    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,

    /// Results file and failure screenshots
    pub artifacts_dir: PathBuf,

    /// Exported as NODE_PATH so generated scripts can `require('playwright')`
    pub node_modules_dir: Option<PathBuf>,

    pub server: Option<ServerConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            session_command: CommandSpec::new(
                "cargo",
                [
                    "run",
                    "--package",
                    "drive-cli",
                    "--release",
                    "--features",
                    "test-utils",
                    "create-test-session",
                ],
            ),
            user_command: CommandSpec::new(
                "cargo",
                ["run", "--bin", "cli", "--features", "cli", "create-user"],
            ),
            provisioning_timeout_ms: 120_000,
            expect_timeout_ms: 5_000,
            scenario_timeout_ms: 120_000,
            readiness: ReadinessGate::default(),
            workers: 1,
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
            artifacts_dir: PathBuf::from("test-results"),
            node_modules_dir: None,
            server: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Defaults (or `path`), overridden by the process environment
    pub fn load(path: Option<&Path>) -> E2eResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    /// Apply `DRIVE_E2E_*` overrides read through `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> E2eResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DRIVE_E2E_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("DRIVE_E2E_SESSION_COMMAND") {
            self.session_command = parse_command("DRIVE_E2E_SESSION_COMMAND", &v)?;
        }
        if let Some(v) = lookup("DRIVE_E2E_USER_COMMAND") {
            self.user_command = parse_command("DRIVE_E2E_USER_COMMAND", &v)?;
        }
        if let Some(v) = lookup("DRIVE_E2E_PROVISIONING_TIMEOUT_MS") {
            self.provisioning_timeout_ms = parse_number("DRIVE_E2E_PROVISIONING_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("DRIVE_E2E_EXPECT_TIMEOUT_MS") {
            self.expect_timeout_ms = parse_number("DRIVE_E2E_EXPECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("DRIVE_E2E_SCENARIO_TIMEOUT_MS") {
            self.scenario_timeout_ms = parse_number("DRIVE_E2E_SCENARIO_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("DRIVE_E2E_WORKERS") {
            self.workers = parse_number("DRIVE_E2E_WORKERS", &v)?;
        }
        if let Some(v) = lookup("DRIVE_E2E_BROWSER") {
            self.browser = v.parse()?;
        }
        if let Some(v) = lookup("DRIVE_E2E_NODE_MODULES") {
            self.node_modules_dir = Some(PathBuf::from(v));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> E2eResult<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| E2eError::Config(format!("base_url {}: {}", self.base_url, e)))?;
        if self.workers == 0 {
            return Err(E2eError::Config("workers must be at least 1".to_string()));
        }
        if self.expect_timeout_ms == 0 || self.scenario_timeout_ms == 0 {
            return Err(E2eError::Config("timeouts must be non-zero".to_string()));
        }
        self.readiness.validate()
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_millis(self.provisioning_timeout_ms)
    }

    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_timeout_ms)
    }
}

fn parse_command(key: &str, value: &str) -> E2eResult<CommandSpec> {
    CommandSpec::parse(value).ok_or_else(|| E2eError::Config(format!("{} is empty", key)))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> E2eResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| E2eError::Config(format!("{} is not a number: {}", key, value)))
}
