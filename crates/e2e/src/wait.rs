//! Bounded waits
//!
//! Every UI wait the harness emits, the readiness gate included, is rendered
//! by [`render_wait`]: one auto-retrying Playwright `expect` parameterized by a
//! [`Condition`] and a timeout. Waits on the Rust side (server health) use
//! [`poll_until`]. Nothing in the harness sleeps for a fixed amount of time.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

/// A state the subject of a wait must reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Visible,
    Hidden,
    Enabled,
    Disabled,
    /// Element's class list contains this class
    HasClass(String),
    /// Page URL equals this path resolved against the base URL
    Url(String),
}

impl Condition {
    fn matcher_js(&self, timeout: Duration) -> String {
        let opts = format!("{{ timeout: {} }}", timeout.as_millis());
        match self {
            Condition::Visible => format!("toBeVisible({})", opts),
            Condition::Hidden => format!("toBeHidden({})", opts),
            Condition::Enabled => format!("toBeEnabled({})", opts),
            Condition::Disabled => format!("toBeDisabled({})", opts),
            Condition::HasClass(class) => {
                format!("toHaveClass(new RegExp({}), {})", js_string(&class_pattern(class)), opts)
            }
            Condition::Url(path) => {
                format!("toHaveURL(new URL({}, baseUrl).href, {})", js_string(path), opts)
            }
        }
    }
}

/// Regex source matching `class` as a whole entry of a class list
pub fn class_pattern(class: &str) -> String {
    format!(r"(^|\s){}(\s|$)", regex::escape(class))
}

/// Encode `s` as a JavaScript string literal
pub(crate) fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Render one awaited, auto-retrying expectation on `subject`
pub fn render_wait(subject: &str, condition: &Condition, timeout: Duration) -> String {
    format!("await expect({}).{};", subject, condition.matcher_js(timeout))
}

/// The element whose class flips once the application has finished starting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessGate {
    pub selector: String,
    pub ready_class: String,
    /// Falls back to the harness expect timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self {
            selector: ".splash".to_string(),
            ready_class: "splash-hidden".to_string(),
            timeout_ms: None,
        }
    }
}

impl ReadinessGate {
    /// Older builds of the app signal readiness on a loading overlay
    pub fn loading_overlay() -> Self {
        Self {
            selector: ".loading-overlay".to_string(),
            ready_class: "is-done".to_string(),
            timeout_ms: None,
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.selector.trim().is_empty() {
            return Err(E2eError::Config("readiness selector is empty".to_string()));
        }
        let class_name = regex::Regex::new(r"^-?[A-Za-z_][A-Za-z0-9_-]*$")
            .map_err(|e| E2eError::Config(e.to_string()))?;
        if !class_name.is_match(&self.ready_class) {
            return Err(E2eError::Config(format!(
                "readiness class is not a CSS class name: {:?}",
                self.ready_class
            )));
        }
        Ok(())
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn describe(&self) -> String {
        format!("readiness:{}.{}", self.selector, self.ready_class)
    }

    pub fn render(&self, default_timeout: Duration) -> String {
        let subject = format!("page.locator({})", js_string(&self.selector));
        render_wait(
            &subject,
            &Condition::HasClass(self.ready_class.clone()),
            self.timeout(default_timeout),
        )
    }
}

/// A Rust-side poll that ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeout {
    pub attempts: usize,
    pub elapsed: Duration,
}

/// Run `probe` until it yields a value or `timeout` elapses
///
/// The probe always runs at least once and once more at the deadline.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        if let Some(value) = probe().await {
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(PollTimeout { attempts, elapsed });
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    #[test_case(Condition::Visible, "toBeVisible({ timeout: 5000 })" ; "visible")]
    #[test_case(Condition::Hidden, "toBeHidden({ timeout: 5000 })" ; "hidden")]
    #[test_case(Condition::Enabled, "toBeEnabled({ timeout: 5000 })" ; "enabled")]
    #[test_case(Condition::Disabled, "toBeDisabled({ timeout: 5000 })" ; "disabled")]
    #[test_case(Condition::Url("/storage".into()), r#"toHaveURL(new URL("/storage", baseUrl).href, { timeout: 5000 })"# ; "url")]
    fn test_render_wait(condition: Condition, matcher: &str) {
        let js = render_wait("page.locator(\"h1\")", &condition, Duration::from_secs(5));
        assert_eq!(js, format!("await expect(page.locator(\"h1\")).{};", matcher));
    }

    #[test]
    fn test_readiness_gate_renders_class_wait() {
        let js = ReadinessGate::default().render(Duration::from_millis(7000));

        assert!(js.starts_with("await expect(page.locator(\".splash\")).toHaveClass(new RegExp("));
        assert!(js.contains("hidden"));
        assert!(js.contains(r"(^|\\s)"));
        assert!(js.ends_with("{ timeout: 7000 });"));
    }

    #[test]
    fn test_class_pattern_matches_whole_class() {
        let re = regex::Regex::new(&class_pattern("is-done")).unwrap();
        assert!(re.is_match("loading-overlay is-done"));
        assert!(re.is_match("is-done"));
        assert!(!re.is_match("loading-overlay is-done-soon"));
        assert!(!re.is_match("loading-overlay"));
    }

    #[test]
    fn test_readiness_gate_validation() {
        ReadinessGate::default().validate().unwrap();
        ReadinessGate::loading_overlay().validate().unwrap();

        let bad = ReadinessGate {
            ready_class: "is done".into(),
            ..ReadinessGate::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_poll_until_returns_first_value() {
        let calls = AtomicUsize::new(0);
        let value = poll_until(Duration::from_secs(2), Duration::from_millis(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { (n >= 3).then_some(n) }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_poll_until_is_bounded() {
        let start = Instant::now();
        let err = poll_until(Duration::from_millis(50), Duration::from_millis(10), || async {
            None::<()>
        })
        .await
        .unwrap_err();

        assert!(err.attempts >= 2);
        assert!(err.elapsed >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
