//! Main scenario runner that orchestrates provisioning, injection and Playwright

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightHandle;
use crate::provision::{CommandProvisioner, SessionProvisioner};
use crate::server::ServerHandle;
use crate::session::BrowserContext;
use crate::spec::{Identity, Scenario, UNIQUE_VAR};
use crate::users::{CommandUserCreator, TestUser, UserCreator};

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub last_url: Option<String>,
    pub screenshot: Option<PathBuf>,
}

impl ScenarioResult {
    fn passed(name: &str, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            duration_ms,
            error: None,
            error_kind: None,
            last_url: None,
            screenshot: None,
        }
    }

    fn failed(name: &str, duration_ms: u64, err: &E2eError) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            duration_ms,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            last_url: err.last_url().map(String::from),
            screenshot: err.screenshot().cloned(),
        }
    }
}

/// Result of running a batch of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

/// A scenario with its identity established and its script compiled
#[derive(Debug)]
pub struct PreparedScenario {
    pub context: BrowserContext,
    pub script: String,
    pub vars: HashMap<String, String>,
}

/// Runs scenarios, each in its own freshly provisioned browser context
pub struct ScenarioRunner {
    config: HarnessConfig,
    provisioner: Arc<dyn SessionProvisioner>,
    users: Arc<dyn UserCreator>,
    playwright: PlaywrightHandle,
    server: Option<ServerHandle>,
}

impl ScenarioRunner {
    /// Runner that provisions sessions and users through the configured commands
    pub fn new(config: HarnessConfig) -> E2eResult<Self> {
        config.validate()?;

        let provisioner = CommandProvisioner::new(
            config.session_command.clone(),
            config.provisioning_timeout(),
        );
        let users = CommandUserCreator::new(config.user_command.clone(), config.provisioning_timeout());
        let playwright = PlaywrightHandle::new(&config)?;

        Ok(Self {
            config,
            provisioner: Arc::new(provisioner),
            users: Arc::new(users),
            playwright,
            server: None,
        })
    }

    /// Substitute the session provisioning strategy
    pub fn with_provisioner(mut self, provisioner: Arc<dyn SessionProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Substitute the user creation strategy
    pub fn with_user_creator(mut self, users: Arc<dyn UserCreator>) -> Self {
        self.users = users;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Start the application if the config says the harness owns it
    pub async fn start_server(&mut self) -> E2eResult<()> {
        if self.server.is_some() {
            return Ok(());
        }
        if let Some(server_config) = &self.config.server {
            self.server = Some(ServerHandle::spawn(server_config, &self.config.base_url).await?);
        }
        Ok(())
    }

    pub fn stop_server(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }

    /// Establish identity, create and seed the context, compile the script
    pub async fn prepare(&self, scenario: &Scenario) -> E2eResult<PreparedScenario> {
        scenario.validate()?;
        scenario.check_upload_files()?;

        let mut vars = HashMap::new();
        vars.insert(UNIQUE_VAR.to_string(), Uuid::new_v4().simple().to_string());

        let mut context = BrowserContext::new(
            &self.config.base_url,
            self.config.browser,
            self.config.viewport,
            self.config.headless,
        )?;

        match scenario.identity {
            Identity::Guest => {}
            Identity::Session => {
                let token = self.provisioner.provision_session().await?;
                context.inject_session(&token, &self.config.base_url)?;
            }
            Identity::RegisteredUser => {
                let user = TestUser::generate();
                self.users.create_user(&user).await?;
                vars.extend(user.template_vars());
            }
        }

        let script = self.playwright.build_script(&mut context, scenario, &vars)?;
        debug!(
            "Prepared {} in context {} ({} steps)",
            scenario.name,
            context.id(),
            scenario.steps.len()
        );

        Ok(PreparedScenario {
            context,
            script,
            vars,
        })
    }

    async fn execute(&self, scenario: &Scenario) -> E2eResult<()> {
        let prepared = self.prepare(scenario).await?;
        self.playwright
            .run_script(&scenario.name, &prepared.script)
            .await?
            .into_result()
    }

    /// Run one scenario; failures are captured in the result, never retried
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        info!("Running scenario: {}", scenario.name);

        let outcome = self.execute(scenario).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!("✓ {} ({} ms)", scenario.name, duration_ms);
                ScenarioResult::passed(&scenario.name, duration_ms)
            }
            Err(e) => {
                error!("✗ {} - {}", scenario.name, e);
                ScenarioResult::failed(&scenario.name, duration_ms, &e)
            }
        }
    }

    /// Run scenarios concurrently, up to `workers` at a time; results keep input order
    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        info!(
            "Running {} scenario(s) with {} worker(s)...",
            scenarios.len(),
            self.config.workers
        );

        let mut indexed: Vec<(usize, ScenarioResult)> = stream::iter(scenarios.iter().enumerate())
            .map(|(i, scenario)| async move { (i, self.run_scenario(scenario).await) })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let results: Vec<ScenarioResult> = indexed.into_iter().map(|(_, r)| r).collect();
        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteResult {
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Run only scenarios carrying `tag`; a tag nothing carries is an error
    pub async fn run_tagged(&self, scenarios: &[Scenario], tag: &str) -> E2eResult<SuiteResult> {
        let filtered: Vec<Scenario> = Scenario::filter_by_tag(scenarios, tag)
            .into_iter()
            .cloned()
            .collect();
        if filtered.is_empty() {
            return Err(E2eError::SpecParse(format!("No scenario tagged: {}", tag)));
        }
        Ok(self.run_all(&filtered).await)
    }

    /// Run the scenario called `name`
    pub async fn run_named(&self, scenarios: &[Scenario], name: &str) -> E2eResult<SuiteResult> {
        let scenario = scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Scenario not found: {}", name)))?;
        Ok(self.run_all(std::slice::from_ref(scenario)).await)
    }

    /// Write results to `test-results.json` in the artifacts directory
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.artifacts_dir)?;

        let path = self.config.artifacts_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Drop for ScenarioRunner {
    fn drop(&mut self) {
        self.stop_server();
    }
}
