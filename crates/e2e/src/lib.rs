//! Drive E2E Harness
//!
//! This crate drives browser end-to-end scenarios against the Drive web
//! application. It:
//! - Provisions authenticated sessions out-of-band through a backend command
//! - Injects them into a fresh browser context before the first navigation
//! - Gates every navigation on the application's readiness signal
//! - Compiles declarative YAML scenarios into Playwright scripts and runs them
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ScenarioRunner (Rust)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  prepare(scenario)                                           │
//! │    ├── SessionProvisioner::provision_session() -> token      │
//! │    │     or UserCreator::create_user(TestUser)               │
//! │    ├── BrowserContext::new() + inject_session(token, origin) │
//! │    └── PlaywrightHandle::build_script(context, scenario)     │
//! │  run_scenario(scenario)                                      │
//! │    ├── run_script() -> ScriptOutcome                         │
//! │    └── ScriptOutcome::into_result() -> E2eError taxonomy     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                             │
//! │    ├── identity: guest | session | registered_user          │
//! │    └── steps: navigate (+ readiness gate), click, fill,      │
//! │              select, upload, dismiss, expect_*               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod playwright;
pub mod provision;
pub mod runner;
pub mod server;
pub mod session;
pub mod spec;
pub mod users;
pub mod wait;

pub use config::HarnessConfig;
pub use error::{E2eError, E2eResult};
pub use provision::{SessionProvisioner, SessionToken};
pub use runner::ScenarioRunner;
pub use session::{inject_session, BrowserContext};
pub use spec::{Scenario, ScenarioStep};
pub use wait::ReadinessGate;
