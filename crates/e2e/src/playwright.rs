//! Playwright browser automation
//!
//! A scenario is compiled into one Node script that owns one browser context.
//! Before each operation the script records which step it is on; whatever
//! happens, it prints a single outcome line prefixed with [`OUTCOME_MARKER`]
//! that the Rust side maps onto [`E2eError`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};
use crate::session::BrowserContext;
use crate::spec::{Scenario, ScenarioStep, StepKind};
use crate::wait::{js_string, render_wait, Condition, ReadinessGate};

/// Prefix of the script's outcome line on stdout
pub const OUTCOME_MARKER: &str = "__DRIVE_E2E_OUTCOME__";

/// The step a script was executing, as reported back by the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMarker {
    pub index: usize,
    pub kind: StepKind,
    pub name: String,
    pub timeout_ms: u64,
}

/// What a finished script reported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub success: bool,
    #[serde(default)]
    pub steps: Option<usize>,
    #[serde(default)]
    pub step: Option<StepMarker>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub screenshot: Option<PathBuf>,
    /// Set when the script's own watchdog ended the run
    #[serde(default)]
    pub timed_out: bool,
}

impl ScriptOutcome {
    /// A watchdog report, keeping the step the script never finished
    pub fn into_timeout(self, name: &str, timeout: Duration) -> E2eError {
        E2eError::ScenarioTimeout {
            name: name.to_string(),
            timeout,
            step: self.step.map(|s| s.name),
            last_url: self.url,
            screenshot: self.screenshot,
        }
    }

    /// Classify a failed outcome by the kind of step that was running
    pub fn into_result(self) -> E2eResult<()> {
        if self.success {
            return Ok(());
        }

        let reason = self.error.unwrap_or_else(|| "unknown error".to_string());
        let last_url = self.url.unwrap_or_else(|| "about:blank".to_string());
        let screenshot = self.screenshot;

        let Some(step) = self.step else {
            return Err(E2eError::Playwright(format!("browser setup failed: {}", reason)));
        };

        Err(match step.kind {
            StepKind::Readiness => E2eError::ReadinessTimeout {
                step: step.name,
                timeout_ms: step.timeout_ms,
                last_url,
                reason,
                screenshot,
            },
            StepKind::Assertion => E2eError::AssertionTimeout {
                step: step.name,
                timeout_ms: step.timeout_ms,
                last_url,
                reason,
                screenshot,
            },
            StepKind::Navigation | StepKind::Action | StepKind::FileChooser => E2eError::StepFailed {
                step: step.name,
                reason,
                last_url,
                screenshot,
            },
        })
    }
}

/// Find and decode the outcome line; `None` when the script never printed one
pub fn parse_outcome(stdout: &str) -> E2eResult<Option<ScriptOutcome>> {
    match stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(OUTCOME_MARKER))
    {
        Some(json) => Ok(Some(serde_json::from_str(json.trim())?)),
        None => Ok(None),
    }
}

/// Compiles scenarios to Playwright scripts and runs them with Node
#[derive(Debug, Clone)]
pub struct PlaywrightHandle {
    expect_timeout: Duration,
    scenario_timeout: Duration,
    readiness: ReadinessGate,
    screenshot_dir: PathBuf,
    node_modules_dir: Option<PathBuf>,
}

impl PlaywrightHandle {
    pub fn new(config: &HarnessConfig) -> E2eResult<Self> {
        let artifacts_dir = if config.artifacts_dir.is_absolute() {
            config.artifacts_dir.clone()
        } else {
            std::env::current_dir()?.join(&config.artifacts_dir)
        };

        Ok(Self {
            expect_timeout: config.expect_timeout(),
            scenario_timeout: config.scenario_timeout(),
            readiness: config.readiness.clone(),
            screenshot_dir: artifacts_dir.join("screenshots"),
            node_modules_dir: config.node_modules_dir.clone(),
        })
    }

    /// Check if Playwright is installed
    pub fn check_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Build the script for `scenario`, opening `context` in the process
    pub fn build_script(
        &self,
        context: &mut BrowserContext,
        scenario: &Scenario,
        vars: &HashMap<String, String>,
    ) -> E2eResult<String> {
        let steps = scenario
            .steps
            .iter()
            .map(|step| step.expand(vars))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|var| {
                E2eError::invalid_scenario(&scenario.name, format!("unbound template variable ${{{}}}", var))
            })?;

        let viewport = scenario.viewport.unwrap_or_else(|| context.viewport());
        let base_url = context.base_url().as_str().to_string();
        let browser = context.browser().as_str();
        let headless = context.headless();
        let screenshot = self.screenshot_dir.join(format!("{}.png", context.id()));
        let storage_state = serde_json::to_string(context.open())?;
        let (watchdog, capture) = self.watchdog();

        let mut script = String::new();

        // Header
        script.push_str(&format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');
const {{ expect }} = require('@playwright/test');
const fs = require('fs');

const OUTCOME = {marker};
const baseUrl = {base_url};
const WATCHDOG_MS = {watchdog_ms};
const CAPTURE_MS = {capture_ms};
const SCREENSHOT_DIR = {screenshot_dir};
const SCREENSHOT = {screenshot};

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    baseURL: baseUrl,
    viewport: {{ width: {width}, height: {height} }},
    storageState: {storage_state},
  }});
  const page = await context.newPage();
  let step = null;

  const capture = async () => {{
    try {{
      fs.mkdirSync(SCREENSHOT_DIR, {{ recursive: true }});
      await page.screenshot({{ path: SCREENSHOT, fullPage: true, timeout: CAPTURE_MS }});
      return SCREENSHOT;
    }} catch (_) {{
      return null;
    }}
  }};

  // Fires before the harness kills this process, so the running step is still reported
  const watchdog = setTimeout(async () => {{
    console.log(OUTCOME + JSON.stringify({{
      success: false,
      timed_out: true,
      step,
      error: 'scenario exceeded ' + WATCHDOG_MS + ' ms',
      url: page.url(),
      screenshot: await capture(),
    }}));
    process.exit(1);
  }}, WATCHDOG_MS);

  try {{
"#,
            marker = js_string(OUTCOME_MARKER),
            base_url = js_string(&base_url),
            browser = browser,
            headless = headless,
            width = viewport.width,
            height = viewport.height,
            storage_state = storage_state,
            watchdog_ms = watchdog.as_millis(),
            capture_ms = capture.as_millis(),
            screenshot_dir = js_string(&self.screenshot_dir.to_string_lossy()),
            screenshot = js_string(&screenshot.to_string_lossy()),
        ));

        for (i, step) in steps.iter().enumerate() {
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, step.name()));
            script.push_str(&self.step_to_js(step, i)?);
            script.push('\n');
        }

        // Footer
        script.push_str(&format!(
            r#"
    console.log(OUTCOME + JSON.stringify({{ success: true, steps: {count} }}));
  }} catch (error) {{
    console.log(OUTCOME + JSON.stringify({{
      success: false,
      step,
      error: String((error && error.message) || error),
      url: page.url(),
      screenshot: await capture(),
    }}));
    process.exitCode = 1;
  }} finally {{
    clearTimeout(watchdog);
    await browser.close();
  }}
}})();
"#,
            count = steps.len(),
        ));

        Ok(script)
    }

    /// In-script deadline and screenshot budget, both inside the scenario timeout
    fn watchdog(&self) -> (Duration, Duration) {
        let margin = (self.scenario_timeout / 5).min(Duration::from_secs(10));
        (self.scenario_timeout - margin, margin / 2)
    }

    fn marker_js(&self, index: usize, kind: StepKind, name: String, timeout: Duration) -> E2eResult<String> {
        let marker = StepMarker {
            index,
            kind,
            name,
            timeout_ms: timeout.as_millis() as u64,
        };
        Ok(format!("    step = {};", serde_json::to_string(&marker)?))
    }

    /// Convert a step to JavaScript code
    fn step_to_js(&self, step: &ScenarioStep, index: usize) -> E2eResult<String> {
        let timeout = self.expect_timeout;
        let ms = timeout.as_millis();
        let marker = self.marker_js(index, step.kind(), step.name(), timeout)?;

        let body = match step {
            ScenarioStep::Navigate { path } => {
                let gate_timeout = self.readiness.timeout(timeout);
                let gate_marker = self.marker_js(
                    index,
                    StepKind::Readiness,
                    self.readiness.describe(),
                    gate_timeout,
                )?;
                format!(
                    "    await page.goto(new URL({}, baseUrl).href);\n{}\n    {}",
                    js_string(path),
                    gate_marker,
                    self.readiness.render(timeout)
                )
            }
            ScenarioStep::Click { target } | ScenarioStep::Dismiss { target } => {
                format!("    await {}.click({{ timeout: {} }});", target.to_js(), ms)
            }
            ScenarioStep::Fill { target, value } => {
                format!("    await {}.fill({}, {{ timeout: {} }});", target.to_js(), js_string(value), ms)
            }
            ScenarioStep::Select { target, value } => {
                format!(
                    "    await {}.selectOption({}, {{ timeout: {} }});",
                    target.to_js(),
                    js_string(value),
                    ms
                )
            }
            ScenarioStep::Upload { trigger, files } => {
                let files = files
                    .iter()
                    .map(|f| absolute(f).map(|p| js_string(&p.to_string_lossy())))
                    .collect::<E2eResult<Vec<_>>>()?
                    .join(", ");
                // The listener must exist before the click that fires the event.
                format!(
                    r#"    {{
      const [fileChooser] = await Promise.all([
        page.waitForEvent('filechooser', {{ timeout: {ms} }}),
        {trigger}.click({{ timeout: {ms} }}),
      ]);
      await fileChooser.setFiles([{files}]);
    }}"#,
                    ms = ms,
                    trigger = trigger.to_js(),
                    files = files,
                )
            }
            ScenarioStep::ExpectVisible { target, timeout_ms, .. } => {
                return self.assertion_js(step, index, &target.to_js(), Condition::Visible, *timeout_ms)
            }
            ScenarioStep::ExpectHidden { target, timeout_ms } => {
                return self.assertion_js(step, index, &target.to_js(), Condition::Hidden, *timeout_ms)
            }
            ScenarioStep::ExpectEnabled { target, timeout_ms } => {
                return self.assertion_js(step, index, &target.to_js(), Condition::Enabled, *timeout_ms)
            }
            ScenarioStep::ExpectDisabled { target, timeout_ms } => {
                return self.assertion_js(step, index, &target.to_js(), Condition::Disabled, *timeout_ms)
            }
            ScenarioStep::ExpectUrl { path, timeout_ms } => {
                return self.assertion_js(step, index, "page", Condition::Url(path.clone()), *timeout_ms)
            }
        };

        Ok(format!("{}\n{}", marker, body))
    }

    /// Marker plus one bounded wait; an explicit step timeout overrides the default
    fn assertion_js(
        &self,
        step: &ScenarioStep,
        index: usize,
        subject: &str,
        condition: Condition,
        timeout_ms: Option<u64>,
    ) -> E2eResult<String> {
        let timeout = timeout_ms.map(Duration::from_millis).unwrap_or(self.expect_timeout);
        let marker = self.marker_js(index, StepKind::Assertion, step.name(), timeout)?;
        Ok(format!("{}\n    {}", marker, render_wait(subject, &condition, timeout)))
    }

    /// Execute a compiled script via Node, bounded by the scenario timeout
    pub async fn run_script(&self, scenario_name: &str, script: &str) -> E2eResult<ScriptOutcome> {
        // Write script to temp file
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("scenario.js");
        tokio::fs::write(&script_path, script).await?;

        debug!("Running Playwright script for {}: {}", scenario_name, script_path.display());

        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path)
            .current_dir(temp_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.node_modules_dir {
            cmd.env("NODE_PATH", dir);
        }

        let child = cmd.spawn()?;
        let output = match tokio::time::timeout(self.scenario_timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(E2eError::ScenarioTimeout {
                    name: scenario_name.to_string(),
                    timeout: self.scenario_timeout,
                    step: None,
                    last_url: None,
                    screenshot: None,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_outcome(&stdout)? {
            Some(outcome) if outcome.timed_out => {
                Err(outcome.into_timeout(scenario_name, self.scenario_timeout))
            }
            Some(outcome) => Ok(outcome),
            None => Err(E2eError::Playwright(format!(
                "Script produced no outcome ({}):\nstdout: {}\nstderr: {}",
                output.status,
                stdout,
                String::from_utf8_lossy(&output.stderr)
            ))),
        }
    }
}

fn absolute(path: &Path) -> E2eResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(kind: StepKind) -> StepMarker {
        StepMarker {
            index: 2,
            kind,
            name: "expect_visible:text=Folder created successfully".to_string(),
            timeout_ms: 5000,
        }
    }

    fn failed(kind: StepKind) -> ScriptOutcome {
        ScriptOutcome {
            success: false,
            steps: None,
            step: Some(marker(kind)),
            error: Some("Timed out 5000ms waiting for expect(locator).toBeVisible()".to_string()),
            url: Some("http://localhost:8090/".to_string()),
            screenshot: None,
            timed_out: false,
        }
    }

    #[test]
    fn test_parse_outcome_takes_marked_line() {
        let stdout = format!(
            "some playwright noise\n{}{{\"success\":true,\"steps\":4}}\n",
            OUTCOME_MARKER
        );
        let outcome = parse_outcome(&stdout).unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.steps, Some(4));

        assert!(parse_outcome("nothing here").unwrap().is_none());
        assert!(parse_outcome(&format!("{}not-json", OUTCOME_MARKER)).is_err());
    }

    #[test]
    fn test_outcome_classification() {
        assert!(matches!(
            failed(StepKind::Readiness).into_result(),
            Err(E2eError::ReadinessTimeout { timeout_ms: 5000, .. })
        ));
        assert!(matches!(
            failed(StepKind::Assertion).into_result(),
            Err(E2eError::AssertionTimeout { .. })
        ));
        assert!(matches!(
            failed(StepKind::FileChooser).into_result(),
            Err(E2eError::StepFailed { .. })
        ));

        let mut setup = failed(StepKind::Action);
        setup.step = None;
        assert!(matches!(setup.into_result(), Err(E2eError::Playwright(_))));
    }

    #[test]
    fn test_failed_outcome_keeps_last_url() {
        let err = failed(StepKind::Assertion).into_result().unwrap_err();
        assert_eq!(err.last_url(), Some("http://localhost:8090/"));
    }

    #[test]
    fn test_watchdog_outcome_names_the_running_step() {
        let stdout = format!(
            "{}{}",
            OUTCOME_MARKER,
            r#"{"success":false,"timed_out":true,"step":{"index":3,"kind":"assertion","name":"expect_visible:text=favicon.png","timeout_ms":5000},"error":"scenario exceeded 110000 ms","url":"http://localhost:8090/","screenshot":"/tmp/shot.png"}"#
        );
        let outcome = parse_outcome(&stdout).unwrap().unwrap();
        assert!(outcome.timed_out);

        let err = outcome.into_timeout("upload-file", Duration::from_secs(120));
        assert_eq!(err.kind(), "scenario_timeout");
        assert_eq!(err.last_url(), Some("http://localhost:8090/"));
        assert_eq!(err.screenshot(), Some(&PathBuf::from("/tmp/shot.png")));
        assert!(err.to_string().contains("expect_visible:text=favicon.png"));
    }

    #[test]
    fn test_watchdog_fits_inside_scenario_timeout() {
        let mut config = HarnessConfig::default();
        config.scenario_timeout_ms = 120_000;
        let handle = PlaywrightHandle::new(&config).unwrap();
        assert_eq!(
            handle.watchdog(),
            (Duration::from_secs(110), Duration::from_secs(5))
        );

        config.scenario_timeout_ms = 10_000;
        let handle = PlaywrightHandle::new(&config).unwrap();
        let (watchdog, capture) = handle.watchdog();
        assert_eq!(watchdog, Duration::from_secs(8));
        assert!(watchdog + capture < Duration::from_secs(10));
    }
}
