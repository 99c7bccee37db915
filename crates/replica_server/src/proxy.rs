//! Self-healing reverse proxy in front of preview environments.
//!
//! Every request either reaches the live environment of its session or gets
//! an auto-refreshing interim page while a new environment is built from the
//! durable store. Gateway failures never reach the client.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use replica_sandbox::{EnvironmentManager, ProjectFile};
use replica_store::DurableStore;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::ServerResult;
use crate::pages::{failed_page, interim_page};
use crate::registry::SessionRegistry;

/// Path prefix the proxy is mounted under.
pub const PROXY_PREFIX: &str = "/api/sandbox";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// How a proxied response came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// Relayed from the environment
    Forwarded,
    /// Interim page while an environment is (re)built
    Interim,
    /// The id cannot be recreated
    Gone,
}

/// Framework-neutral response.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub outcome: ProxyOutcome,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    fn html(outcome: ProxyOutcome, status: u16, page: String) -> Self {
        Self {
            outcome,
            status,
            headers: vec![
                ("content-type".to_string(), "text/html; charset=utf-8".to_string()),
                ("cache-control".to_string(), "no-store".to_string()),
            ],
            body: page.into_bytes(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Proxy prefix of one session, e.g. `/api/sandbox/<id>`.
pub fn session_prefix(id: &str) -> String {
    format!("{}/{}", PROXY_PREFIX, id)
}

/// Whether a body of this type carries asset root references.
pub fn is_rewritable(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime.ends_with("/javascript") || mime.ends_with("/x-javascript")
}

/// Point `"/_next/` and `'/_next/` at `prefix`.
pub fn rewrite_asset_paths(body: &str, prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    body.replace("\"/_next/", &format!("\"{}/_next/", prefix))
        .replace("'/_next/", &format!("'{}/_next/", prefix))
}

/// Whether `status` means the environment itself is unreachable.
pub fn is_gateway_failure(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}

#[derive(Debug, Default)]
struct RecoveryState {
    recreating: HashSet<String>,
    failures: HashMap<String, u32>,
    failed: HashSet<String>,
}

/// Clears the in-flight mark of a recreation, also on unwind.
struct RecreateGuard {
    state: Arc<Mutex<RecoveryState>>,
    id: String,
}

impl Drop for RecreateGuard {
    fn drop(&mut self) {
        self.state.lock().recreating.remove(&self.id);
    }
}

pub struct PreviewProxy {
    environments: Arc<EnvironmentManager>,
    store: Arc<dyn DurableStore>,
    registry: Arc<SessionRegistry>,
    client: reqwest::Client,
    config: ProxyConfig,
    state: Arc<Mutex<RecoveryState>>,
}

impl PreviewProxy {
    pub fn new(
        environments: Arc<EnvironmentManager>,
        store: Arc<dyn DurableStore>,
        registry: Arc<SessionRegistry>,
        config: ProxyConfig,
    ) -> ServerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.forward_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            environments,
            store,
            registry,
            client,
            config,
            state: Arc::new(Mutex::new(RecoveryState::default())),
        })
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.state.lock().failed.contains(id)
    }

    pub fn is_recreating(&self, id: &str) -> bool {
        self.state.lock().recreating.contains(id)
    }

    pub fn failure_count(&self, id: &str) -> u32 {
        self.state.lock().failures.get(id).copied().unwrap_or(0)
    }

    fn interim(&self) -> ProxyResponse {
        ProxyResponse::html(ProxyOutcome::Interim, 200, interim_page(self.config.refresh_secs))
    }

    /// Serve `GET /<path>?<query>` for session `id`.
    pub async fn proxy(self: &Arc<Self>, id: &str, path: &str, query: Option<&str>) -> ProxyResponse {
        if self.is_failed(id) {
            return ProxyResponse::html(ProxyOutcome::Gone, 410, failed_page(id));
        }

        let Some(env) = self.environments.live(id) else {
            if self.registry.is_running(id) {
                debug!(session = %id, "Pipeline still running, serving interim page");
            } else {
                self.schedule_recreate(id);
            }
            return self.interim();
        };

        let mut target = format!("{}/{}", env.base_url, path.trim_start_matches('/'));
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }

        let mut request = self.client.get(&target).header("accept-encoding", "identity");
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(session = %id, "Environment unreachable: {}", e);
                return self.recover(id, &env.handle);
            }
        };

        let status = response.status().as_u16();
        if is_gateway_failure(status) {
            warn!(session = %id, status, "Environment returned a gateway error");
            return self.recover(id, &env.handle);
        }

        let prefix = session_prefix(id);
        let mut headers: Vec<(String, String)> = Vec::new();
        for (name, value) in response.headers() {
            let name = name.as_str().to_ascii_lowercase();
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            let value = if name == "location" && value.starts_with('/') && !value.starts_with("//") {
                format!("{}{}", prefix, value)
            } else {
                value.to_string()
            };
            headers.push((name, value));
        }
        let rewrite = headers
            .iter()
            .find(|(k, _)| k == "content-type")
            .is_some_and(|(_, v)| is_rewritable(v));

        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                warn!(session = %id, "Failed reading environment response: {}", e);
                return self.recover(id, &env.handle);
            }
        };
        let body = if rewrite {
            rewrite_asset_paths(&String::from_utf8_lossy(&body), &prefix).into_bytes()
        } else {
            body
        };

        ProxyResponse {
            outcome: ProxyOutcome::Forwarded,
            status,
            headers,
            body,
        }
    }

    /// A broken environment is replaced, unless its pipeline still owns it.
    fn recover(self: &Arc<Self>, id: &str, handle: &str) -> ProxyResponse {
        if self.registry.is_running(id) {
            debug!(session = %id, "Pipeline still running, leaving its environment in place");
        } else {
            self.environments.invalidate(id, handle);
            self.schedule_recreate(id);
        }
        self.interim()
    }

    /// Start rebuilding the environment of `id` unless a rebuild is already
    /// running. Returns whether a new rebuild started.
    pub fn schedule_recreate(self: &Arc<Self>, id: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.failed.contains(id) || !state.recreating.insert(id.to_string()) {
                return false;
            }
        }
        info!(session = %id, "Scheduling environment recreation");

        let guard = RecreateGuard {
            state: self.state.clone(),
            id: id.to_string(),
        };
        let proxy = self.clone();
        tokio::spawn(async move {
            let guard = guard;
            proxy.recreate(&guard.id).await;
        });
        true
    }

    async fn recreate(&self, id: &str) {
        let record = match self.store.get_record(id).await {
            Ok(Some(record)) => record,
            // A known session may not have persisted yet
            Ok(None) if self.registry.get(id).is_some() => {
                self.record_failure(id, "no durable record yet");
                return;
            }
            Ok(None) => {
                self.give_up(id, "no durable record");
                return;
            }
            Err(e) => {
                self.record_failure(id, &e.to_string());
                return;
            }
        };
        let artifacts = match self.store.list_artifacts(id).await {
            Ok(artifacts) if !artifacts.is_empty() => artifacts,
            Ok(_) => {
                self.give_up(id, "no stored files");
                return;
            }
            Err(e) => {
                self.record_failure(id, &e.to_string());
                return;
            }
        };

        let files: Vec<ProjectFile> = artifacts
            .into_iter()
            .map(|a| ProjectFile::new(a.path, a.content))
            .collect();
        match self.environments.provision(id, &files, |_| {}).await {
            Ok(env) => {
                if let Err(e) = self.environments.install_packages(id, &record.dependencies).await {
                    warn!(session = %id, "Extra packages failed to install: {}", e);
                }
                self.state.lock().failures.remove(id);
                info!(session = %id, base_url = %env.base_url, "Environment recreated");
            }
            Err(e) => self.record_failure(id, &e.to_string()),
        }
    }

    fn record_failure(&self, id: &str, reason: &str) {
        let mut state = self.state.lock();
        let count = {
            let count = state.failures.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        warn!(session = %id, failures = count, "Recreation failed: {}", reason);
        if count >= self.config.max_recreate_failures {
            state.failed.insert(id.to_string());
            warn!(session = %id, "Giving up on environment after {} failures", count);
        }
    }

    fn give_up(&self, id: &str, reason: &str) {
        warn!(session = %id, "Cannot recreate environment: {}", reason);
        self.state.lock().failed.insert(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_asset_paths() {
        let html = r#"<script src="/_next/static/chunks/main.js"></script><link href='/_next/static/css/a.css'>"#;
        let out = rewrite_asset_paths(html, "/api/sandbox/abc");
        assert!(out.contains(r#""/api/sandbox/abc/_next/static/chunks/main.js""#));
        assert!(out.contains("'/api/sandbox/abc/_next/static/css/a.css'"));
        assert!(!out.contains("\"/_next/"));
    }

    #[test]
    fn test_rewrite_leaves_other_paths() {
        let js = r#"fetch("/api/data"); const a = "/_nextish";"#;
        assert_eq!(rewrite_asset_paths(js, "/p"), js);
    }

    #[test]
    fn test_rewritable_types() {
        assert!(is_rewritable("text/html; charset=utf-8"));
        assert!(is_rewritable("application/javascript"));
        assert!(is_rewritable("text/javascript; charset=utf-8"));
        assert!(!is_rewritable("text/css"));
        assert!(!is_rewritable("image/png"));
        assert!(!is_rewritable("application/json"));
    }

    #[test]
    fn test_gateway_statuses() {
        assert!(is_gateway_failure(502));
        assert!(is_gateway_failure(503));
        assert!(is_gateway_failure(504));
        assert!(!is_gateway_failure(500));
        assert!(!is_gateway_failure(404));
    }
}
