//! Server management - spawning and health checking the application

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{E2eError, E2eResult};
use crate::wait::poll_until;

/// Handle to a running application process
pub struct ServerHandle {
    child: Child,
    base_url: String,
}

impl ServerHandle {
    /// Spawn the application and wait until it answers on its health path
    pub async fn spawn(config: &ServerConfig, base_url: &str) -> E2eResult<Self> {
        info!("Spawning application server: {}", config.command);

        let mut cmd: Command = config.command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!("Failed to spawn {}: {}", config.command, e))
        })?;

        let mut handle = ServerHandle {
            child,
            base_url: base_url.trim_end_matches('/').to_string(),
        };

        if let Err(e) = handle.wait_for_healthy(&config.health_path, config.startup_timeout()).await {
            handle.stop();
            return Err(e);
        }

        info!("Server is healthy at {}", handle.base_url);
        Ok(handle)
    }

    /// Wait for the server to respond to health checks
    async fn wait_for_healthy(&mut self, health_path: &str, timeout: Duration) -> E2eResult<()> {
        let health_url = format!("{}{}", self.base_url, health_path);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let result = poll_until(timeout, Duration::from_millis(250), || {
            let client = &client;
            let health_url = &health_url;
            async move {
                match client.get(health_url).send().await {
                    Ok(resp) if resp.status().is_success() => Some(()),
                    Ok(resp) => {
                        warn!("Health check returned {}", resp.status());
                        None
                    }
                    Err(e) => {
                        // Connection refused is expected while the server boots
                        if !e.is_connect() {
                            warn!("Health check error: {}", e);
                        }
                        None
                    }
                }
            }
        })
        .await;

        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(E2eError::ServerStartup(format!(
                "server exited during startup with {}",
                status
            )));
        }

        result.map_err(|timeout| E2eError::ServerHealthCheck(timeout.attempts))
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the server: SIGTERM, a grace period, then kill
    pub fn stop(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        info!("Stopping server (pid: {})", pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        let _ = self.child.start_kill();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSpec;

    #[tokio::test]
    async fn test_spawn_fails_when_server_exits() {
        let config = ServerConfig {
            command: CommandSpec::new("sh", ["-c", "exit 3"]),
            health_path: "/".to_string(),
            startup_timeout_ms: 300,
        };

        let err = ServerHandle::spawn(&config, "http://127.0.0.1:9")
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            E2eError::ServerStartup(_) | E2eError::ServerHealthCheck(_)
        ));
    }

    #[tokio::test]
    async fn test_spawn_reports_missing_binary() {
        let config = ServerConfig {
            command: CommandSpec::new("definitely-not-a-drive-server", Vec::<String>::new()),
            health_path: "/".to_string(),
            startup_timeout_ms: 100,
        };

        let err = ServerHandle::spawn(&config, "http://127.0.0.1:9")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, E2eError::ServerStartup(_)));
    }
}
