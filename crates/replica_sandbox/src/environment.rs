//! Per-session environment lifecycle.
//!
//! ```text
//! absent -> creating -> installing -> starting -> serving -> stale -> absent
//! ```
//!
//! At most one environment is tracked per session id. A handle is recorded
//! as pending the moment the provider issues it, so a teardown racing a
//! provision still releases it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EnvironmentConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::provider::SandboxProvider;
use crate::scaffold::{ProjectFile, Scaffold};

/// Lifecycle state of a session's environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Absent,
    Creating,
    Installing,
    Starting,
    Serving,
    /// Older than the configured max age
    Stale,
}

impl std::fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Installing => "installing",
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Stale => "stale",
        };
        write!(f, "{}", s)
    }
}

/// A serving environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub session_id: String,
    /// Provider handle
    pub handle: String,
    /// Base URL of the application runtime, without trailing slash
    pub base_url: String,
    pub project_dir: String,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    /// Seconds since creation.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

/// Owns every environment of the process.
pub struct EnvironmentManager {
    provider: Arc<dyn SandboxProvider>,
    config: EnvironmentConfig,
    scaffold: Scaffold,
    environments: RwLock<HashMap<String, Environment>>,
    pending: RwLock<HashMap<String, String>>,
    states: RwLock<HashMap<String, EnvironmentState>>,
}

impl EnvironmentManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: EnvironmentConfig, scaffold: Scaffold) -> Self {
        Self {
            provider,
            config,
            scaffold,
            environments: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Current lifecycle state for `session`.
    pub fn state(&self, session: &str) -> EnvironmentState {
        if let Some(env) = self.environments.read().get(session) {
            if self.is_stale(env) {
                return EnvironmentState::Stale;
            }
            return EnvironmentState::Serving;
        }
        self.states
            .read()
            .get(session)
            .copied()
            .unwrap_or(EnvironmentState::Absent)
    }

    fn set_state(&self, session: &str, state: EnvironmentState) {
        debug!(session, %state, "Environment state");
        self.states.write().insert(session.to_string(), state);
    }

    fn clear_state(&self, session: &str) {
        self.states.write().remove(session);
    }

    fn is_stale(&self, env: &Environment) -> bool {
        env.age_secs() >= 0 && env.age_secs() as u64 > self.config.max_age_secs
    }

    /// Create, install and start an environment for `session` with `files`
    /// overlaid on the scaffold. `on_state` sees every transition.
    ///
    /// Any previous environment of the session is torn down first. On failure
    /// the half-built handle is deleted and nothing is tracked.
    pub async fn provision<F>(
        &self,
        session: &str,
        files: &[ProjectFile],
        on_state: F,
    ) -> SandboxResult<Environment>
    where
        F: Fn(EnvironmentState) + Send + Sync,
    {
        self.teardown(session).await;

        self.set_state(session, EnvironmentState::Creating);
        on_state(EnvironmentState::Creating);

        let handle = match self
            .provider
            .create(&self.config.image, self.config.app_port)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.clear_state(session);
                return Err(e);
            }
        };
        self.pending
            .write()
            .insert(session.to_string(), handle.clone());
        info!(session, handle = %handle, provider = self.provider.name(), "Environment created");

        match self.install_and_start(session, &handle, files, &on_state).await {
            Ok(env) => {
                self.pending.write().remove(session);
                self.environments
                    .write()
                    .insert(session.to_string(), env.clone());
                self.clear_state(session);
                on_state(EnvironmentState::Serving);
                info!(session, base_url = %env.base_url, "Environment serving");
                Ok(env)
            }
            Err(e) => {
                warn!(session, "Provisioning failed: {}", e);
                self.pending.write().remove(session);
                self.clear_state(session);
                if let Err(delete_err) = self.provider.delete(&handle).await {
                    warn!(session, "Failed to delete handle {}: {}", handle, delete_err);
                }
                Err(e)
            }
        }
    }

    async fn install_and_start<F>(
        &self,
        session: &str,
        handle: &str,
        files: &[ProjectFile],
        on_state: &F,
    ) -> SandboxResult<Environment>
    where
        F: Fn(EnvironmentState) + Send + Sync,
    {
        let base_url = self
            .provider
            .routable_address(handle, self.config.app_port)
            .await?
            .trim_end_matches('/')
            .to_string();
        let project_dir = self.provider.project_dir(handle).await?;

        self.set_state(session, EnvironmentState::Installing);
        on_state(EnvironmentState::Installing);

        let merged = self.scaffold.merged_with(files);
        for file in &merged {
            let path = join_project_path(&project_dir, &file.path)?;
            self.provider
                .upload(handle, &path, file.content.as_bytes())
                .await?;
        }
        debug!(session, "Uploaded {} project files", merged.len());

        let install = format!("cd {} && {}", project_dir, self.config.install_command);
        let result = self
            .provider
            .exec(handle, &install, self.config.install_timeout())
            .await?;
        if !result.success() {
            return Err(SandboxError::CommandFailed {
                command: self.config.install_command.clone(),
                exit_code: result.exit_code,
                output: tail(&result.output, 20),
            });
        }

        self.set_state(session, EnvironmentState::Starting);
        on_state(EnvironmentState::Starting);

        let start = format!(
            "cd {} && {}",
            project_dir,
            self.config.rendered_start_command()
        );
        match self
            .provider
            .exec(handle, &start, self.config.start_timeout())
            .await
        {
            Ok(_) => {}
            // Background launches may hold the session open
            Err(SandboxError::Timeout(..)) => debug!(session, "Start command detached"),
            Err(e) => return Err(e),
        }

        self.wait_healthy(session, handle).await?;

        Ok(Environment {
            session_id: session.to_string(),
            handle: handle.to_string(),
            base_url,
            project_dir,
            created_at: Utc::now(),
        })
    }

    async fn wait_healthy(&self, session: &str, handle: &str) -> SandboxResult<()> {
        let probe = self.config.health_probe_command();
        for attempt in 1..=self.config.health_attempts {
            tokio::time::sleep(self.config.health_interval()).await;
            match self
                .provider
                .exec(handle, &probe, std::time::Duration::from_secs(10))
                .await
            {
                Ok(result) => {
                    let status = result.output.trim().to_string();
                    debug!(session, attempt, status = %status, "Health probe");
                    if is_healthy_status(&status) {
                        info!(session, "Runtime ready after {} probes", attempt);
                        return Ok(());
                    }
                }
                Err(e) => debug!(session, attempt, "Health probe error: {}", e),
            }
        }

        let log_tail = self
            .provider
            .exec(
                handle,
                &format!("tail -n 20 {}", self.config.runtime_log),
                std::time::Duration::from_secs(5),
            )
            .await
            .map(|r| r.output)
            .unwrap_or_default();
        warn!(session, "Runtime never became healthy:\n{}", log_tail);
        Err(SandboxError::Unhealthy(self.config.health_attempts))
    }

    /// Track an environment built elsewhere, replacing any previous one.
    pub fn adopt(&self, env: Environment) -> Option<Environment> {
        self.environments.write().insert(env.session_id.clone(), env)
    }

    /// The live environment of `session`.
    ///
    /// A stale environment is released here and reported as absent.
    pub fn live(&self, session: &str) -> Option<Environment> {
        let env = self.environments.read().get(session).cloned()?;
        if !self.is_stale(&env) {
            return Some(env);
        }

        let removed = {
            let mut environments = self.environments.write();
            match environments.get(session) {
                Some(current) if current.handle == env.handle => environments.remove(session),
                _ => None,
            }
        };
        if let Some(stale) = removed {
            info!(session, age = stale.age_secs(), "Environment exceeded max age");
            self.release(stale.handle);
        }
        None
    }

    /// Whether any environment, stale or not, is tracked.
    pub fn has_environment(&self, session: &str) -> bool {
        self.environments.read().contains_key(session)
    }

    /// Drop the environment of `session` if it is still `handle`, deleting
    /// the remote side in the background. Returns whether anything changed.
    pub fn invalidate(&self, session: &str, handle: &str) -> bool {
        let removed = {
            let mut environments = self.environments.write();
            match environments.get(session) {
                Some(current) if current.handle == handle => environments.remove(session),
                _ => None,
            }
        };
        match removed {
            Some(env) => {
                info!(session, handle, "Environment invalidated");
                self.release(env.handle);
                true
            }
            None => false,
        }
    }

    fn release(&self, handle: String) {
        let provider = self.provider.clone();
        tokio::spawn(async move {
            if let Err(e) = provider.delete(&handle).await {
                warn!("Failed to delete handle {}: {}", handle, e);
            }
        });
    }

    /// Write one project file into the serving environment.
    pub async fn upload(&self, session: &str, path: &str, content: &str) -> SandboxResult<()> {
        let env = self
            .environments
            .read()
            .get(session)
            .cloned()
            .ok_or_else(|| SandboxError::NoEnvironment(session.to_string()))?;
        let full = join_project_path(&env.project_dir, path)?;
        self.provider
            .upload(&env.handle, &full, content.as_bytes())
            .await?;
        debug!(session, path, "Uploaded file");
        Ok(())
    }

    /// Install extra packages into the serving environment.
    pub async fn install_packages(&self, session: &str, packages: &[String]) -> SandboxResult<()> {
        if packages.is_empty() {
            return Ok(());
        }
        for name in packages {
            if !is_valid_package(name) {
                return Err(SandboxError::InvalidPath(format!("package name {:?}", name)));
            }
        }
        let env = self
            .environments
            .read()
            .get(session)
            .cloned()
            .ok_or_else(|| SandboxError::NoEnvironment(session.to_string()))?;

        let command = format!(
            "cd {} && npm install --no-audit --no-fund {}",
            env.project_dir,
            packages.join(" ")
        );
        info!(session, "Installing packages: {}", packages.join(", "));
        let result = self
            .provider
            .exec(&env.handle, &command, self.config.install_timeout())
            .await?;
        if !result.success() {
            return Err(SandboxError::CommandFailed {
                command: format!("npm install {}", packages.join(" ")),
                exit_code: result.exit_code,
                output: tail(&result.output, 20),
            });
        }
        Ok(())
    }

    /// Last `lines` lines of the runtime log.
    pub async fn logs(&self, session: &str, lines: usize) -> SandboxResult<String> {
        let handle = self
            .environments
            .read()
            .get(session)
            .map(|env| env.handle.clone())
            .ok_or_else(|| SandboxError::NoEnvironment(session.to_string()))?;
        let result = self
            .provider
            .exec(
                &handle,
                &format!("tail -n {} {}", lines, self.config.runtime_log),
                std::time::Duration::from_secs(5),
            )
            .await?;
        Ok(result.output)
    }

    /// Delete every handle of `session`, live or still provisioning.
    /// Best-effort; returns whether anything was tracked.
    pub async fn teardown(&self, session: &str) -> bool {
        let live = self.environments.write().remove(session).map(|env| env.handle);
        let pending = self.pending.write().remove(session);
        self.clear_state(session);

        let mut found = false;
        for handle in live.into_iter().chain(pending) {
            found = true;
            match self.provider.delete(&handle).await {
                Ok(()) => info!(session, handle = %handle, "Environment deleted"),
                Err(e) => warn!(session, "Failed to delete handle {}: {}", handle, e),
            }
        }
        found
    }

    /// Tear down everything, for shutdown.
    pub async fn teardown_all(&self) {
        let mut sessions: Vec<String> = self.environments.read().keys().cloned().collect();
        sessions.extend(self.pending.read().keys().cloned());
        sessions.sort();
        sessions.dedup();
        for session in sessions {
            self.teardown(&session).await;
        }
    }
}

/// `dir/path` for a relative, `..`-free `path`.
pub fn join_project_path(dir: &str, path: &str) -> SandboxResult<String> {
    let clean = path.trim_start_matches("./");
    if clean.is_empty()
        || clean.starts_with('/')
        || clean.contains('\\')
        || clean.split('/').any(|part| part == "..")
    {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    Ok(format!("{}/{}", dir.trim_end_matches('/'), clean))
}

fn is_healthy_status(status: &str) -> bool {
    status
        .parse::<u16>()
        .map(|code| (200..400).contains(&code))
        .unwrap_or(false)
}

fn is_valid_package(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@/._-^~".contains(c))
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use crate::provider::ExecOutput;

    fn manager(provider: &MockProvider) -> EnvironmentManager {
        let config = EnvironmentConfig::default().health(3, 0);
        EnvironmentManager::new(Arc::new(provider.clone()), config, Scaffold::builtin())
    }

    fn healthy() -> MockProvider {
        MockProvider::new()
            .with_address("http://127.0.0.1:4100/")
            .on_exec("localhost:3000", ExecOutput::new(0, "200"))
    }

    #[test]
    fn test_join_project_path() {
        assert_eq!(join_project_path("/p/", "app/page.tsx").unwrap(), "/p/app/page.tsx");
        assert_eq!(join_project_path("/p", "./a.ts").unwrap(), "/p/a.ts");
        assert!(join_project_path("/p", "../etc/passwd").is_err());
        assert!(join_project_path("/p", "/etc/passwd").is_err());
        assert!(join_project_path("/p", "").is_err());
    }

    #[test]
    fn test_healthy_status() {
        assert!(is_healthy_status("200"));
        assert!(is_healthy_status("304"));
        assert!(!is_healthy_status("500"));
        assert!(!is_healthy_status("fail"));
    }

    #[tokio::test]
    async fn test_provision_uploads_scaffold_and_overlay() {
        let provider = healthy();
        let manager = manager(&provider);
        let states = parking_lot::Mutex::new(Vec::new());

        let env = manager
            .provision(
                "s1",
                &[ProjectFile::new("components/Hero.tsx", "export default 1")],
                |s| states.lock().push(s),
            )
            .await
            .unwrap();

        assert_eq!(env.base_url, "http://127.0.0.1:4100");
        assert_eq!(
            provider.file(&env.handle, "/home/mock/project/components/Hero.tsx").as_deref(),
            Some("export default 1")
        );
        assert!(provider
            .uploaded_paths(&env.handle)
            .contains(&"/home/mock/project/package.json".to_string()));
        assert_eq!(
            *states.lock(),
            vec![
                EnvironmentState::Creating,
                EnvironmentState::Installing,
                EnvironmentState::Starting,
                EnvironmentState::Serving
            ]
        );
        assert_eq!(manager.state("s1"), EnvironmentState::Serving);
    }

    #[tokio::test]
    async fn test_failed_install_deletes_handle() {
        let provider = healthy().on_exec("npm install", ExecOutput::new(1, "npm ERR! 404"));
        let manager = manager(&provider);

        let result = manager.provision("s1", &[], |_| {}).await;
        assert!(matches!(result, Err(SandboxError::CommandFailed { .. })));
        assert!(provider.live_handles().is_empty());
        assert_eq!(manager.state("s1"), EnvironmentState::Absent);
        assert!(manager.live("s1").is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_runtime_fails_attempt() {
        let provider = MockProvider::new().on_exec("localhost", ExecOutput::new(1, "fail"));
        let manager = manager(&provider);

        let result = manager.provision("s1", &[], |_| {}).await;
        assert!(matches!(result, Err(SandboxError::Unhealthy(3))));
        assert_eq!(provider.count("delete"), 1);
    }

    #[tokio::test]
    async fn test_stale_environment_is_released() {
        let provider = healthy();
        let manager = manager(&provider);
        let mut env = manager.provision("s1", &[], |_| {}).await.unwrap();

        env.created_at = Utc::now() - chrono::Duration::seconds(700);
        manager.adopt(env);
        assert_eq!(manager.state("s1"), EnvironmentState::Stale);
        assert!(manager.live("s1").is_none());
        assert!(!manager.has_environment("s1"));
    }

    #[tokio::test]
    async fn test_reprovision_replaces_previous_handle() {
        let provider = healthy();
        let manager = manager(&provider);
        let first = manager.provision("s1", &[], |_| {}).await.unwrap();
        let second = manager.provision("s1", &[], |_| {}).await.unwrap();

        assert_ne!(first.handle, second.handle);
        assert_eq!(provider.live_handles(), vec![second.handle.clone()]);
    }

    #[tokio::test]
    async fn test_invalidate_only_matches_current_handle() {
        let provider = healthy();
        let manager = manager(&provider);
        let env = manager.provision("s1", &[], |_| {}).await.unwrap();

        assert!(!manager.invalidate("s1", "other"));
        assert!(manager.invalidate("s1", &env.handle));
        assert!(manager.live("s1").is_none());
    }

    #[tokio::test]
    async fn test_install_packages_rejects_flags() {
        let provider = healthy();
        let manager = manager(&provider);
        manager.provision("s1", &[], |_| {}).await.unwrap();

        assert!(manager
            .install_packages("s1", &["--unsafe-perm".to_string()])
            .await
            .is_err());
        manager
            .install_packages("s1", &["framer-motion".to_string(), "@heroicons/react".to_string()])
            .await
            .unwrap();
        let calls = provider.get_method_calls("exec");
        assert!(calls
            .iter()
            .any(|c| c.detail.as_deref().unwrap_or("").ends_with("framer-motion @heroicons/react")));
    }

    #[tokio::test]
    async fn test_teardown_without_environment() {
        let provider = healthy();
        let manager = manager(&provider);
        assert!(!manager.teardown("missing").await);
        assert!(matches!(
            manager.upload("missing", "a.tsx", "x").await,
            Err(SandboxError::NoEnvironment(_))
        ));
    }
}
