//! Declarative YAML scenarios
//!
//! A scenario declares the identity it starts with and a strictly sequential
//! list of steps. `navigate` always implies the readiness gate, so no step can
//! touch the page before the application finished starting.
//!
//! ```yaml
//! name: create-folder
//! identity: session
//! steps:
//!   - action: navigate
//!     path: /
//!   - action: click
//!     target: { role: button, name: New folder }
//!   - action: expect_visible
//!     target: { css: h2, has_text: New folder }
//!     transient: true
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Viewport;
use crate::error::{E2eError, E2eResult};
use crate::users::USER_TEMPLATE_VARS;
use crate::wait::js_string;

/// Per-scenario unique string, handy for folder names and the like
pub const UNIQUE_VAR: &str = "unique";

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub identity: Identity,

    /// Overrides the harness viewport
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Steps to execute in order
    pub steps: Vec<ScenarioStep>,

    /// File the scenario was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Who the browser is when the scenario starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// Fresh, logged-out context
    #[default]
    Guest,
    /// Session minted out-of-band and injected before navigation
    Session,
    /// User created out-of-band; credentials exposed as `${user.*}`
    RegisteredUser,
}

/// How a step finds its element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
    },
    Label {
        label: String,
    },
    Text {
        text: String,
    },
    Css {
        css: String,
        #[serde(default)]
        has_text: Option<String>,
    },
}

impl Locator {
    pub fn to_js(&self) -> String {
        match self {
            Locator::Role { role, name: Some(name) } => {
                format!("page.getByRole({}, {{ name: {} }})", js_string(role), js_string(name))
            }
            Locator::Role { role, name: None } => format!("page.getByRole({})", js_string(role)),
            Locator::Label { label } => format!("page.getByLabel({})", js_string(label)),
            Locator::Text { text } => format!("page.getByText({})", js_string(text)),
            Locator::Css { css, has_text: Some(text) } => {
                format!("page.locator({}, {{ hasText: {} }})", js_string(css), js_string(text))
            }
            Locator::Css { css, has_text: None } => format!("page.locator({})", js_string(css)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Locator::Role { role, name: Some(name) } => format!("role={}[name={:?}]", role, name),
            Locator::Role { role, name: None } => format!("role={}", role),
            Locator::Label { label } => format!("label={}", label),
            Locator::Text { text } => format!("text={}", text),
            Locator::Css { css, has_text: Some(text) } => format!("{}:has-text({:?})", css, text),
            Locator::Css { css, has_text: None } => css.clone(),
        }
    }

    fn texts(&self) -> Vec<&str> {
        match self {
            Locator::Role { role, name } => std::iter::once(role.as_str())
                .chain(name.as_deref())
                .collect(),
            Locator::Label { label } => vec![label.as_str()],
            Locator::Text { text } => vec![text.as_str()],
            Locator::Css { css, has_text } => std::iter::once(css.as_str())
                .chain(has_text.as_deref())
                .collect(),
        }
    }

    fn expand(&self, vars: &HashMap<String, String>) -> Result<Self, String> {
        let ex = |s: &String| expand_template(s, vars);
        Ok(match self {
            Locator::Role { role, name } => Locator::Role {
                role: ex(role)?,
                name: name.as_ref().map(ex).transpose()?,
            },
            Locator::Label { label } => Locator::Label { label: ex(label)? },
            Locator::Text { text } => Locator::Text { text: ex(text)? },
            Locator::Css { css, has_text } => Locator::Css {
                css: ex(css)?,
                has_text: has_text.as_ref().map(ex).transpose()?,
            },
        })
    }
}

/// What a step does, for ordering rules and failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Navigation,
    Readiness,
    Action,
    FileChooser,
    Assertion,
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Go to a path (relative to the base URL) and pass the readiness gate
    Navigate { path: String },

    Click { target: Locator },

    Fill { target: Locator, value: String },

    /// Pick an option of a `<select>`
    Select { target: Locator, value: String },

    /// Click `trigger` and feed `files` to the file chooser it opens
    Upload { trigger: Locator, files: Vec<PathBuf> },

    /// Click that closes a modal or toast
    Dismiss { target: Locator },

    ExpectVisible {
        target: Locator,
        /// Asserts a modal/toast created by the preceding action
        #[serde(default)]
        transient: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    ExpectHidden {
        target: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    ExpectEnabled {
        target: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    ExpectDisabled {
        target: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    ExpectUrl {
        path: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl ScenarioStep {
    pub fn kind(&self) -> StepKind {
        match self {
            ScenarioStep::Navigate { .. } => StepKind::Navigation,
            ScenarioStep::Click { .. }
            | ScenarioStep::Fill { .. }
            | ScenarioStep::Select { .. }
            | ScenarioStep::Dismiss { .. } => StepKind::Action,
            ScenarioStep::Upload { .. } => StepKind::FileChooser,
            ScenarioStep::ExpectVisible { .. }
            | ScenarioStep::ExpectHidden { .. }
            | ScenarioStep::ExpectEnabled { .. }
            | ScenarioStep::ExpectDisabled { .. }
            | ScenarioStep::ExpectUrl { .. } => StepKind::Assertion,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ScenarioStep::Navigate { path } => format!("navigate:{}", path),
            ScenarioStep::Click { target } => format!("click:{}", target.describe()),
            ScenarioStep::Fill { target, .. } => format!("fill:{}", target.describe()),
            ScenarioStep::Select { target, value } => {
                format!("select:{}={}", target.describe(), value)
            }
            ScenarioStep::Upload { trigger, files } => {
                format!("upload:{}[{} file(s)]", trigger.describe(), files.len())
            }
            ScenarioStep::Dismiss { target } => format!("dismiss:{}", target.describe()),
            ScenarioStep::ExpectVisible { target, .. } => {
                format!("expect_visible:{}", target.describe())
            }
            ScenarioStep::ExpectHidden { target, .. } => {
                format!("expect_hidden:{}", target.describe())
            }
            ScenarioStep::ExpectEnabled { target, .. } => {
                format!("expect_enabled:{}", target.describe())
            }
            ScenarioStep::ExpectDisabled { target, .. } => {
                format!("expect_disabled:{}", target.describe())
            }
            ScenarioStep::ExpectUrl { path, .. } => format!("expect_url:{}", path),
        }
    }

    fn texts(&self) -> Vec<&str> {
        match self {
            ScenarioStep::Navigate { path } | ScenarioStep::ExpectUrl { path, .. } => vec![path.as_str()],
            ScenarioStep::Fill { target, value } | ScenarioStep::Select { target, value } => {
                let mut texts = target.texts();
                texts.push(value.as_str());
                texts
            }
            ScenarioStep::Upload { trigger, .. } => trigger.texts(),
            ScenarioStep::Click { target }
            | ScenarioStep::Dismiss { target }
            | ScenarioStep::ExpectVisible { target, .. }
            | ScenarioStep::ExpectHidden { target, .. }
            | ScenarioStep::ExpectEnabled { target, .. }
            | ScenarioStep::ExpectDisabled { target, .. } => target.texts(),
        }
    }

    /// Substitute `${var}` references with concrete values
    pub fn expand(&self, vars: &HashMap<String, String>) -> Result<Self, String> {
        let ex = |s: &String| expand_template(s, vars);
        Ok(match self {
            ScenarioStep::Navigate { path } => ScenarioStep::Navigate { path: ex(path)? },
            ScenarioStep::Click { target } => ScenarioStep::Click {
                target: target.expand(vars)?,
            },
            ScenarioStep::Fill { target, value } => ScenarioStep::Fill {
                target: target.expand(vars)?,
                value: ex(value)?,
            },
            ScenarioStep::Select { target, value } => ScenarioStep::Select {
                target: target.expand(vars)?,
                value: ex(value)?,
            },
            ScenarioStep::Upload { trigger, files } => ScenarioStep::Upload {
                trigger: trigger.expand(vars)?,
                files: files.clone(),
            },
            ScenarioStep::Dismiss { target } => ScenarioStep::Dismiss {
                target: target.expand(vars)?,
            },
            ScenarioStep::ExpectVisible { target, transient, timeout_ms } => {
                ScenarioStep::ExpectVisible {
                    target: target.expand(vars)?,
                    transient: *transient,
                    timeout_ms: *timeout_ms,
                }
            }
            ScenarioStep::ExpectHidden { target, timeout_ms } => ScenarioStep::ExpectHidden {
                target: target.expand(vars)?,
                timeout_ms: *timeout_ms,
            },
            ScenarioStep::ExpectEnabled { target, timeout_ms } => ScenarioStep::ExpectEnabled {
                target: target.expand(vars)?,
                timeout_ms: *timeout_ms,
            },
            ScenarioStep::ExpectDisabled { target, timeout_ms } => ScenarioStep::ExpectDisabled {
                target: target.expand(vars)?,
                timeout_ms: *timeout_ms,
            },
            ScenarioStep::ExpectUrl { path, timeout_ms } => ScenarioStep::ExpectUrl {
                path: ex(path)?,
                timeout_ms: *timeout_ms,
            },
        })
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("valid template regex"))
}

/// Names of the `${var}` references in `text`
pub fn template_refs(text: &str) -> impl Iterator<Item = &str> {
    template_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Replace every `${var}` in `text`; errors with the first unknown name
pub fn expand_template(text: &str, vars: &HashMap<String, String>) -> Result<String, String> {
    if let Some(missing) = template_refs(text).find(|name| !vars.contains_key(*name)) {
        return Err(missing.to_string());
    }
    Ok(template_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| vars[&caps[1]].clone())
        .into_owned())
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a scenario file; relative upload paths resolve against its directory
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;

        if let Some(dir) = path.parent() {
            for step in &mut scenario.steps {
                if let ScenarioStep::Upload { files, .. } = step {
                    for file in files.iter_mut() {
                        if file.is_relative() {
                            *file = dir.join(&*file);
                        }
                    }
                }
            }
        }

        scenario.source = Some(path.to_path_buf());
        Ok(scenario)
    }

    /// Load every scenario under a directory, in path order
    ///
    /// An unreadable or scenario-free directory is an error, never an empty suite.
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                E2eError::SpecParse(format!("cannot read scenarios under {}: {}", dir.display(), e))
            })?;
            let is_yaml = entry
                .path()
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if is_yaml && entry.file_type().is_file() {
                scenarios.push(Self::from_file(entry.path())?);
            }
        }

        if scenarios.is_empty() {
            return Err(E2eError::SpecParse(format!(
                "no scenario files under {}",
                dir.display()
            )));
        }

        let mut seen = HashSet::new();
        for scenario in &scenarios {
            if !seen.insert(scenario.name.as_str()) {
                return Err(E2eError::SpecParse(format!(
                    "duplicate scenario name: {}",
                    scenario.name
                )));
            }
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Template variables this scenario's identity makes available
    pub fn available_vars(&self) -> Vec<&'static str> {
        let mut vars = vec![UNIQUE_VAR];
        if self.identity == Identity::RegisteredUser {
            vars.extend(USER_TEMPLATE_VARS);
        }
        vars
    }

    /// Check step ordering and template references
    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::invalid_scenario("<unnamed>", "name is empty"));
        }
        let fail = |reason: String| E2eError::invalid_scenario(&self.name, reason);

        match self.steps.first() {
            None => return Err(fail("no steps".to_string())),
            Some(ScenarioStep::Navigate { .. }) => {}
            Some(other) => {
                return Err(fail(format!(
                    "first step must be navigate, found {}",
                    other.name()
                )))
            }
        }

        // An action must separate a transient assertion from the navigation or
        // transient assertion before it, and dismissals need something to close.
        let mut acted = false;
        let mut transient_open = false;

        for (i, step) in self.steps.iter().enumerate() {
            let n = i + 1;
            match step {
                ScenarioStep::Navigate { path } => {
                    if !path.starts_with('/') {
                        return Err(fail(format!("step {}: path must start with '/': {}", n, path)));
                    }
                    acted = false;
                    transient_open = false;
                }
                ScenarioStep::ExpectUrl { path, .. } if !path.starts_with('/') => {
                    return Err(fail(format!("step {}: path must start with '/': {}", n, path)));
                }
                ScenarioStep::Upload { files, .. } if files.is_empty() => {
                    return Err(fail(format!("step {}: upload without files", n)));
                }
                ScenarioStep::Dismiss { .. } => {
                    if !transient_open {
                        return Err(fail(format!(
                            "step {}: dismiss without an asserted transient state",
                            n
                        )));
                    }
                    transient_open = false;
                    acted = true;
                }
                ScenarioStep::ExpectVisible { transient: true, .. } => {
                    if !acted {
                        return Err(fail(format!(
                            "step {}: transient state asserted before any action created it",
                            n
                        )));
                    }
                    transient_open = true;
                    acted = false;
                }
                _ => {}
            }
            if matches!(step.kind(), StepKind::Action | StepKind::FileChooser) {
                acted = true;
            }
        }

        let available = self.available_vars();
        for step in &self.steps {
            // Upload files are checked on disk before any variable exists
            if let ScenarioStep::Upload { files, .. } = step {
                if let Some(file) = files.iter().find(|f| f.to_string_lossy().contains("${")) {
                    return Err(fail(format!(
                        "{}: upload paths cannot use template variables: {}",
                        step.name(),
                        file.display()
                    )));
                }
            }
            for text in step.texts() {
                if let Some(unknown) = template_refs(text).find(|r| !available.iter().any(|a| a == r)) {
                    return Err(fail(format!(
                        "{}: unknown template variable ${{{}}}",
                        step.name(),
                        unknown
                    )));
                }
            }
        }

        Ok(())
    }

    /// Every upload file must exist before a browser is started
    pub fn check_upload_files(&self) -> E2eResult<()> {
        for step in &self.steps {
            if let ScenarioStep::Upload { files, .. } = step {
                if let Some(missing) = files.iter().find(|f| !f.is_file()) {
                    return Err(E2eError::invalid_scenario(
                        &self.name,
                        format!("upload file not found: {}", missing.display()),
                    ));
                }
            }
        }
        Ok(())
    }
}
