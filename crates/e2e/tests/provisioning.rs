//! Session provisioning and user creation against stand-in commands
//!
//! `sh -c` scripts play the role of the backend CLI so these tests run
//! without a Drive checkout.

use std::collections::HashSet;
use std::time::Duration;

use drive_e2e::command::CommandSpec;
use drive_e2e::provision::CommandProvisioner;
use drive_e2e::users::{CommandUserCreator, TestUser, UserCreator};
use drive_e2e::{E2eError, SessionProvisioner};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", ["-c", script, "sh"])
}

fn provisioner(script: &str) -> CommandProvisioner {
    CommandProvisioner::new(sh(script), Duration::from_secs(10))
}

#[tokio::test]
async fn test_provision_session_reads_token() {
    let token = provisioner(r#"echo '{"token": "tok-abc", "user_id": "u-1"}'"#)
        .provision_session()
        .await
        .unwrap();

    assert_eq!(token.as_str(), "tok-abc");
}

#[tokio::test]
async fn test_provision_session_nonzero_exit() {
    let err = provisioner(r#"echo '{"token": "tok-abc"}'; echo boom >&2; exit 1"#)
        .provision_session()
        .await
        .unwrap_err();

    match err {
        E2eError::Provisioning(msg) => assert!(msg.contains("boom"), "{}", msg),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_provision_session_malformed_output() {
    let err = provisioner("echo 'Compiling drive-cli v0.1.0'")
        .provision_session()
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::Provisioning(_)));
    assert_eq!(err.kind(), "provisioning_error");
}

#[tokio::test]
async fn test_provision_session_missing_token() {
    let err = provisioner(r#"echo '{"session": "tok-abc"}'"#)
        .provision_session()
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::Provisioning(_)));
}

#[tokio::test]
async fn test_provision_session_missing_binary() {
    let err = CommandProvisioner::new(
        CommandSpec::new("definitely-not-drive-cli", Vec::<String>::new()),
        Duration::from_secs(1),
    )
    .provision_session()
    .await
    .unwrap_err();
    assert!(matches!(err, E2eError::Provisioning(_)));
}

#[tokio::test]
async fn test_provision_session_times_out() {
    let p = CommandProvisioner::new(sh("sleep 10"), Duration::from_millis(200));

    let start = std::time::Instant::now();
    let err = p.provision_session().await.unwrap_err();

    assert!(matches!(err, E2eError::ProvisioningTimeout(_)));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_concurrent_sessions_are_distinct() {
    // $$ differs per process, so every invocation mints its own token
    let p = provisioner(r#"echo "{\"token\": \"tok-$$\"}""#);

    let tokens = futures::future::join_all((0..4).map(|_| p.provision_session())).await;
    let tokens: HashSet<String> = tokens
        .into_iter()
        .map(|t| t.unwrap().as_str().to_string())
        .collect();

    assert_eq!(tokens.len(), 4);
}

#[tokio::test]
async fn test_create_user_passes_flags() {
    let creator = CommandUserCreator::new(
        sh(r#"case "$*" in *--username*--email*--password*--country*) echo "User created successfully." ;; *) echo "missing flags: $*" ;; esac"#),
        Duration::from_secs(10),
    );

    creator.create_user(&TestUser::generate()).await.unwrap();
}

#[tokio::test]
async fn test_create_user_requires_marker() {
    let creator = CommandUserCreator::new(sh("echo 'User already exists'"), Duration::from_secs(10));

    let err = creator.create_user(&TestUser::generate()).await.unwrap_err();
    assert!(matches!(err, E2eError::UserCreation(_)));
    assert_eq!(err.kind(), "user_creation_error");
}

#[tokio::test]
async fn test_create_user_requires_success_status() {
    let creator = CommandUserCreator::new(
        sh("echo 'User created successfully.'; exit 2"),
        Duration::from_secs(10),
    );

    let err = creator.create_user(&TestUser::generate()).await.unwrap_err();
    assert!(matches!(err, E2eError::UserCreation(_)));
}
