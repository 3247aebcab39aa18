//! E2E runner entry point
//!
//! Loads YAML scenarios and runs them against a Drive instance.
//! Run with: cargo run --package drive-e2e -- --scenarios crates/e2e/scenarios

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use drive_e2e::config::Browser;
use drive_e2e::playwright::PlaywrightHandle;
use drive_e2e::{E2eError, E2eResult, HarnessConfig, Scenario, ScenarioRunner};

#[derive(Parser, Debug)]
#[command(name = "drive-e2e")]
#[command(about = "Browser E2E runner for Drive")]
struct Args {
    /// Path to scenarios directory
    #[arg(short, long, default_value = "crates/e2e/scenarios")]
    scenarios: PathBuf,

    /// Run only scenarios matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific scenario by name
    #[arg(short, long)]
    name: Option<String>,

    /// YAML harness configuration
    #[arg(short, long, env = "DRIVE_E2E_CONFIG")]
    config: Option<PathBuf>,

    /// Origin the application is served from
    #[arg(long)]
    base_url: Option<String>,

    /// Scenarios to run concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<Browser>,

    /// Run with a visible browser window
    #[arg(long)]
    headed: bool,

    /// Output directory for results and failure screenshots
    #[arg(short, long)]
    artifacts: Option<PathBuf>,

    /// node_modules directory providing playwright and @playwright/test
    #[arg(long)]
    node_modules: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if args.json_logs {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };
    tracing_subscriber::registry().with(layer).with(filter).init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;

    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(browser) = args.browser {
        config.browser = browser;
    }
    if args.headed {
        config.headless = false;
    }
    if let Some(artifacts) = args.artifacts {
        config.artifacts_dir = artifacts;
    }
    if let Some(node_modules) = args.node_modules {
        config.node_modules_dir = Some(node_modules);
    }

    info!("Drive E2E runner v{} against {}", env!("CARGO_PKG_VERSION"), config.base_url);
    PlaywrightHandle::check_installed()?;

    let scenarios = Scenario::load_all(&args.scenarios)?;
    let mut runner = ScenarioRunner::new(config)?;

    runner.start_server().await?;

    let results = if let Some(name) = args.name {
        runner.run_named(&scenarios, &name).await?
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&scenarios, &tag).await?
    } else {
        runner.run_all(&scenarios).await
    };

    if results.total == 0 {
        return Err(E2eError::SpecParse("No scenarios selected".to_string()));
    }

    runner.write_results(&results)?;
    runner.stop_server();

    Ok(results.failed == 0)
}
