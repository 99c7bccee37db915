//! Engine configuration.
//!
//! Layered lowest to highest: defaults, an optional TOML file, `REPLICA_*`
//! environment variables, then whatever the binary sets from its flags.
//!
//! ```toml
//! bind = "0.0.0.0:8000"
//! data_dir = "/var/lib/replica"
//!
//! [admission]
//! max_concurrent = 5
//!
//! [proxy.headers]
//! x-preview-skip-warning = "true"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use replica_core::GenerationConfig;
use replica_sandbox::EnvironmentConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};

/// Per-client rate limit and global concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Minimum seconds between two requests of one client
    pub rate_window_secs: u64,
    /// Pipelines allowed to run at once
    pub max_concurrent: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: 10,
            max_concurrent: 3,
        }
    }
}

impl AdmissionConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

/// Reverse proxy behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Failed recreations before an id is given up on
    pub max_recreate_failures: u32,
    /// Refresh interval of the interim page, in seconds
    pub refresh_secs: u64,
    /// Timeout for one forwarded request, in seconds
    pub forward_timeout_secs: u64,
    /// Extra headers sent with every forwarded request
    pub headers: BTreeMap<String, String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_recreate_failures: 2,
            refresh_secs: 3,
            forward_timeout_secs: 30,
            headers: BTreeMap::new(),
        }
    }
}

impl ProxyConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

/// Auto-repair loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub enabled: bool,
    /// Maximum repair rounds per session
    pub rounds: u32,
    /// Wait after uploading a fix, in seconds
    pub settle_secs: u64,
    /// Runtime log lines inspected for error hints
    pub log_lines: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rounds: 3,
            settle_secs: 4,
            log_lines: 80,
        }
    }
}

impl RepairConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// Background pipeline and event streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wait after uploading generated files before probing, in seconds
    pub compile_settle_secs: u64,
    /// Longest silence on an event stream before it is closed, in seconds
    pub event_timeout_secs: u64,
    /// Sessions are forgotten after this many seconds
    pub session_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compile_settle_secs: 5,
            event_timeout_secs: 300,
            session_ttl_secs: 1800,
        }
    }
}

impl PipelineConfig {
    pub fn compile_settle(&self) -> Duration {
        Duration::from_secs(self.compile_settle_secs)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

/// Where captures come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Base URL of an HTTP capture service
    pub endpoint: Option<String>,
    /// Directory of pre-recorded capture bundles
    pub dir: Option<PathBuf>,
}

/// Generation service client settings. Credentials come from the
/// environment only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub timeout_secs: u64,
    /// Attempts per call on rate limits and server errors
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_attempts: 2,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Listen address
    pub bind: String,
    /// Root of the durable store
    pub data_dir: PathBuf,
    pub capture: CaptureConfig,
    pub llm: LlmConfig,
    pub admission: AdmissionConfig,
    pub generation: GenerationConfig,
    pub environment: EnvironmentConfig,
    pub proxy: ProxyConfig,
    pub repair: RepairConfig,
    pub pipeline: PipelineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            data_dir: PathBuf::from("data"),
            capture: CaptureConfig::default(),
            llm: LlmConfig::default(),
            admission: AdmissionConfig::default(),
            generation: GenerationConfig::default(),
            environment: EnvironmentConfig::default(),
            proxy: ProxyConfig::default(),
            repair: RepairConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml(content: &str) -> ServerResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        Ok(config.with_env())
    }

    /// Apply `REPLICA_*` variables from the process environment.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Apply `REPLICA_*` variables from `lookup`.
    pub fn with_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("REPLICA_BIND") {
            self.bind = bind;
        }
        if let Some(dir) = lookup("REPLICA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = lookup("REPLICA_CAPTURE_URL") {
            self.capture.endpoint = Some(endpoint);
        }
        if let Some(dir) = lookup("REPLICA_CAPTURE_DIR") {
            self.capture.dir = Some(PathBuf::from(dir));
        }
        if let Some(image) = lookup("REPLICA_SANDBOX_IMAGE") {
            self.environment.image = image;
        }
        if let Some(dir) = lookup("REPLICA_TEMPLATE_DIR") {
            self.environment.template_dir = Some(PathBuf::from(dir));
        }
        parse_into(&lookup, "REPLICA_MAX_CONCURRENT", &mut self.admission.max_concurrent);
        parse_into(&lookup, "REPLICA_RATE_WINDOW_SECS", &mut self.admission.rate_window_secs);
        parse_into(&lookup, "REPLICA_WORKER_CAP", &mut self.generation.worker_cap);
        parse_into(&lookup, "REPLICA_MAX_AGE_SECS", &mut self.environment.max_age_secs);
        parse_into(&lookup, "REPLICA_REPAIR_ROUNDS", &mut self.repair.rounds);
        if let Some(headers) = lookup("REPLICA_PROXY_HEADERS") {
            for pair in headers.split(',') {
                match pair.split_once('=') {
                    Some((name, value)) if !name.trim().is_empty() => {
                        self.proxy
                            .headers
                            .insert(name.trim().to_string(), value.trim().to_string());
                    }
                    _ => warn!("Ignoring malformed proxy header {:?}", pair),
                }
            }
        }
        self
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn capture_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.capture.endpoint = Some(endpoint.into());
        self
    }

    pub fn capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture.dir = Some(dir.into());
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.admission.max_concurrent = max;
        self
    }

    pub fn rate_window_secs(mut self, secs: u64) -> Self {
        self.admission.rate_window_secs = secs;
        self
    }

    pub fn proxy_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.proxy.headers.insert(name.into(), value.into());
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        if self.admission.max_concurrent == 0 {
            return Err(ServerError::Config("admission.max_concurrent must be at least 1".into()));
        }
        if self.generation.worker_cap == 0 || self.generation.snapshots_per_worker == 0 {
            return Err(ServerError::Config(
                "generation.worker_cap and generation.snapshots_per_worker must be at least 1".into(),
            ));
        }
        if self.environment.health_attempts == 0 {
            return Err(ServerError::Config("environment.health_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring {}: {:?} is not a valid value", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.admission.rate_window_secs, 10);
        assert_eq!(config.admission.max_concurrent, 3);
        assert_eq!(config.proxy.max_recreate_failures, 2);
        assert_eq!(config.repair.rounds, 3);
        assert_eq!(config.pipeline.session_ttl_secs, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            bind = "127.0.0.1:9000"

            [admission]
            max_concurrent = 8

            [environment]
            max_age_secs = 120

            [proxy.headers]
            x-skip-warning = "1"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.admission.max_concurrent, 8);
        assert_eq!(config.admission.rate_window_secs, 10);
        assert_eq!(config.environment.max_age_secs, 120);
        assert_eq!(config.environment.app_port, 3000);
        assert_eq!(config.proxy.headers["x-skip-warning"], "1");
    }

    #[test]
    fn test_env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("REPLICA_MAX_CONCURRENT", "1"),
            ("REPLICA_WORKER_CAP", "not-a-number"),
            ("REPLICA_PROXY_HEADERS", "a=1, b = 2,broken"),
            ("REPLICA_CAPTURE_URL", "http://capture:4000"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_toml("[admission]\nmax_concurrent = 8\n")
            .unwrap()
            .with_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.admission.max_concurrent, 1);
        assert_eq!(config.generation.worker_cap, 5);
        assert_eq!(config.proxy.headers.len(), 2);
        assert_eq!(config.proxy.headers["b"], "2");
        assert_eq!(config.capture.endpoint.as_deref(), Some("http://capture:4000"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = EngineConfig::default().max_concurrent(0);
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(matches!(EngineConfig::from_toml("bind = ["), Err(ServerError::Toml(_))));
    }
}
