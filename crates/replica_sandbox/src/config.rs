//! Environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How preview environments are created, installed and started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Base image for new environments
    pub image: String,
    /// Port the application runtime listens on
    pub app_port: u16,
    /// Command run in the project directory after upload
    pub install_command: String,
    /// Timeout for the install command, in seconds
    pub install_timeout_secs: u64,
    /// Command that starts the runtime; must detach
    pub start_command: String,
    /// Timeout for launching the start command, in seconds
    pub start_timeout_secs: u64,
    /// File inside the environment receiving runtime output
    pub runtime_log: String,
    /// Health probes before giving up
    pub health_attempts: u32,
    /// Pause between health probes, in seconds
    pub health_interval_secs: u64,
    /// Environments older than this are treated as stale
    pub max_age_secs: u64,
    /// Replaces the built-in scaffold when set
    pub template_dir: Option<PathBuf>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            image: "node:20-slim".to_string(),
            app_port: 3000,
            install_command: "npm install --prefer-offline --no-audit --no-fund".to_string(),
            install_timeout_secs: 180,
            start_command: "nohup npx next dev -p {port} > {log} 2>&1 &".to_string(),
            start_timeout_secs: 10,
            runtime_log: "/tmp/replica-runtime.log".to_string(),
            health_attempts: 25,
            health_interval_secs: 4,
            max_age_secs: 600,
            template_dir: None,
        }
    }
}

impl EnvironmentConfig {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn app_port(mut self, port: u16) -> Self {
        self.app_port = port;
        self
    }

    pub fn install_command(mut self, command: impl Into<String>) -> Self {
        self.install_command = command.into();
        self
    }

    pub fn start_command(mut self, command: impl Into<String>) -> Self {
        self.start_command = command.into();
        self
    }

    /// Set probe count and interval.
    pub fn health(mut self, attempts: u32, interval_secs: u64) -> Self {
        self.health_attempts = attempts;
        self.health_interval_secs = interval_secs;
        self
    }

    pub fn max_age_secs(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    pub fn template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Start command with `{port}` and `{log}` substituted.
    pub fn rendered_start_command(&self) -> String {
        self.start_command
            .replace("{port}", &self.app_port.to_string())
            .replace("{log}", &self.runtime_log)
    }

    /// In-environment probe printing the HTTP status of the runtime root.
    pub fn health_probe_command(&self) -> String {
        format!(
            "node -e \"require('http').get('http://localhost:{}',r=>{{process.stdout.write(String(r.statusCode));process.exit(0)}}).on('error',()=>{{process.stdout.write('fail');process.exit(1)}})\"",
            self.app_port
        )
    }
}
