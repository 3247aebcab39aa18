//! Runner behavior with in-process provisioning doubles
//!
//! Everything here stops short of launching Node: scenarios are prepared
//! (identity established, context seeded, script compiled) or fail before
//! a browser would be needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drive_e2e::session::{normalize_origin, SESSION_STORAGE_KEY};
use drive_e2e::users::{TestUser, UserCreator};
use drive_e2e::{E2eError, E2eResult, HarnessConfig, Scenario, ScenarioRunner, SessionProvisioner, SessionToken};

/// Hands out tok-1, tok-2, ... and counts calls
#[derive(Default)]
struct CountingProvisioner {
    calls: AtomicUsize,
}

#[async_trait]
impl SessionProvisioner for CountingProvisioner {
    async fn provision_session(&self) -> E2eResult<SessionToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        SessionToken::new(format!("tok-{}", n))
    }
}

struct FailingProvisioner;

#[async_trait]
impl SessionProvisioner for FailingProvisioner {
    async fn provision_session(&self) -> E2eResult<SessionToken> {
        Err(E2eError::Provisioning("backend unavailable".to_string()))
    }
}

#[derive(Default)]
struct RecordingUsers {
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl UserCreator for RecordingUsers {
    async fn create_user(&self, user: &TestUser) -> E2eResult<()> {
        self.created.lock().unwrap().push(user.username.clone());
        Ok(())
    }
}

fn config() -> HarnessConfig {
    HarnessConfig {
        workers: 4,
        artifacts_dir: std::env::temp_dir().join("drive-e2e-runner-tests"),
        ..HarnessConfig::default()
    }
}

fn scenario(name: &str, identity: &str) -> Scenario {
    Scenario::from_yaml(&format!(
        r#"
name: {name}
identity: {identity}
steps:
  - action: navigate
    path: /
  - action: expect_visible
    target: {{ css: h1, has_text: Home }}
"#
    ))
    .unwrap()
}

#[tokio::test]
async fn test_session_identity_is_injected() {
    let provisioner = Arc::new(CountingProvisioner::default());
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(provisioner.clone());

    let prepared = runner.prepare(&scenario("home", "session")).await.unwrap();

    let origin = normalize_origin(&runner.config().base_url).unwrap();
    assert_eq!(
        prepared.context.storage_state().local_storage(&origin, SESSION_STORAGE_KEY),
        Some("tok-1")
    );
    assert!(prepared.context.is_opened());
    assert!(prepared.script.contains("tok-1"));
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_guest_identity_skips_provisioning() {
    let provisioner = Arc::new(CountingProvisioner::default());
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(provisioner.clone());

    let prepared = runner.prepare(&scenario("home", "guest")).await.unwrap();

    assert!(prepared.context.storage_state().origins.is_empty());
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_each_scenario_gets_its_own_session() {
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(Arc::new(CountingProvisioner::default()));
    let origin = normalize_origin(&runner.config().base_url).unwrap();

    let first = runner.prepare(&scenario("a", "session")).await.unwrap();
    let second = runner.prepare(&scenario("a", "session")).await.unwrap();

    let token = |p: &drive_e2e::runner::PreparedScenario| {
        p.context
            .storage_state()
            .local_storage(&origin, SESSION_STORAGE_KEY)
            .map(String::from)
    };
    assert_ne!(token(&first), token(&second));
    assert_ne!(first.context.id(), second.context.id());
    assert_ne!(first.vars["unique"], second.vars["unique"]);
}

#[tokio::test]
async fn test_registered_user_exposes_credentials() {
    let users = Arc::new(RecordingUsers::default());
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_user_creator(users.clone());

    let scenario = Scenario::from_yaml(
        r#"
name: login
identity: registered_user
steps:
  - action: navigate
    path: /login
  - action: fill
    target: { label: Username or email }
    value: ${user.username}
"#,
    )
    .unwrap();

    let prepared = runner.prepare(&scenario).await.unwrap();
    let created = users.created.lock().unwrap().clone();

    assert_eq!(created.len(), 1);
    assert_eq!(prepared.vars["user.username"], created[0]);
    assert!(prepared.script.contains(&format!("fill(\"{}\"", created[0])));
    assert!(prepared.context.storage_state().origins.is_empty());
}

#[tokio::test]
async fn test_provisioning_failure_fails_the_scenario() {
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(Arc::new(FailingProvisioner));

    let result = runner.run_scenario(&scenario("home", "session")).await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("provisioning_error"));
    assert!(result.error.unwrap().contains("backend unavailable"));
    assert!(result.screenshot.is_none());
}

#[tokio::test]
async fn test_invalid_scenario_fails_before_provisioning() {
    let provisioner = Arc::new(CountingProvisioner::default());
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(provisioner.clone());

    let scenario = Scenario::from_yaml(
        r#"
name: no-navigation
identity: session
steps:
  - action: click
    target: { role: button, name: Submit }
"#,
    )
    .unwrap();

    let result = runner.run_scenario(&scenario).await;
    assert_eq!(result.error_kind.as_deref(), Some("invalid_scenario"));
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_run_all_keeps_input_order() {
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(Arc::new(FailingProvisioner));

    let scenarios: Vec<Scenario> = (0..6).map(|i| scenario(&format!("s{}", i), "session")).collect();
    let suite = runner.run_all(&scenarios).await;

    let names: Vec<&str> = suite.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["s0", "s1", "s2", "s3", "s4", "s5"]);
    assert_eq!(suite.total, 6);
    assert_eq!(suite.failed, 6);
    assert_eq!(suite.passed, 0);
}

#[tokio::test]
async fn test_run_tagged_without_match() {
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(Arc::new(FailingProvisioner));

    let err = runner
        .run_tagged(&[scenario("home", "guest")], "no-such-tag")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::SpecParse(_)));
}

#[tokio::test]
async fn test_run_tagged_selects_tagged_scenarios() {
    let runner = ScenarioRunner::new(config())
        .unwrap()
        .with_provisioner(Arc::new(FailingProvisioner));

    let mut tagged = scenario("tagged", "session");
    tagged.tags.push("storage".to_string());
    let scenarios = [scenario("untagged", "session"), tagged];

    let suite = runner.run_tagged(&scenarios, "storage").await.unwrap();
    assert_eq!(suite.total, 1);
    assert_eq!(suite.results[0].name, "tagged");
}

#[tokio::test]
async fn test_run_named_unknown_scenario() {
    let runner = ScenarioRunner::new(config()).unwrap();
    let err = runner
        .run_named(&[scenario("home", "guest")], "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::SpecParse(_)));
}

#[tokio::test]
async fn test_write_results() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScenarioRunner::new(HarnessConfig {
        artifacts_dir: dir.path().to_path_buf(),
        ..HarnessConfig::default()
    })
    .unwrap()
    .with_provisioner(Arc::new(FailingProvisioner));

    let suite = runner.run_all(&[scenario("home", "session")]).await;
    let path = runner.write_results(&suite).unwrap();

    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["failed"], 1);
    assert_eq!(written["results"][0]["error_kind"], "provisioning_error");
}
