//! The orchestration engine facade.
//!
//! Owns every shared structure (admission, sessions, environments, proxy
//! state) and exposes the operations the HTTP layer calls.

use std::sync::Arc;
use std::time::Duration;

use replica_core::{normalize_url, CaptureProducer};
use replica_llm::{GenerationService, RepairService};
use replica_sandbox::EnvironmentManager;
use replica_store::{DurableRecord, DurableStore, Page};
use tracing::{debug, info};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::config::EngineConfig;
use crate::error::{ServerError, ServerResult};
use crate::events::{SessionEvent, SharedReceiver};
use crate::pages::static_preview;
use crate::pipeline::run_pipeline;
use crate::proxy::{session_prefix, PreviewProxy, ProxyResponse};
use crate::registry::SessionRegistry;

/// External services the engine is wired to.
pub struct EngineServices {
    pub capture: Arc<dyn CaptureProducer>,
    pub generator: Arc<dyn GenerationService>,
    pub repairer: Arc<dyn RepairService>,
    pub environments: Arc<EnvironmentManager>,
    pub store: Arc<dyn DurableStore>,
}

/// A session that was just admitted.
pub struct SessionStart {
    pub id: String,
    pub receiver: SharedReceiver,
}

/// What `GET /api/preview/{id}` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewPage {
    /// A live environment exists at this path
    Redirect(String),
    /// Escaped source of the composed page
    Source(String),
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) admission: AdmissionController,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) environments: Arc<EnvironmentManager>,
    pub(crate) store: Arc<dyn DurableStore>,
    pub(crate) capture: Arc<dyn CaptureProducer>,
    pub(crate) generator: Arc<dyn GenerationService>,
    pub(crate) repairer: Arc<dyn RepairService>,
    pub(crate) proxy: Arc<PreviewProxy>,
    pub(crate) client: reqwest::Client,
}

impl Engine {
    pub fn new(config: EngineConfig, services: EngineServices) -> ServerResult<Arc<Self>> {
        config.validate()?;
        let registry = Arc::new(SessionRegistry::new());
        let proxy = Arc::new(PreviewProxy::new(
            services.environments.clone(),
            services.store.clone(),
            registry.clone(),
            config.proxy.clone(),
        )?);
        let client = reqwest::Client::builder()
            .timeout(config.proxy.forward_timeout())
            .build()?;

        Ok(Arc::new(Self {
            admission: AdmissionController::new(&config.admission),
            registry,
            environments: services.environments,
            store: services.store,
            capture: services.capture,
            generator: services.generator,
            repairer: services.repairer,
            proxy,
            client,
            config,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn environments(&self) -> &Arc<EnvironmentManager> {
        &self.environments
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn preview_proxy(&self) -> &Arc<PreviewProxy> {
        &self.proxy
    }

    /// Admit a clone of `url` for `client_key` and start its pipeline in the
    /// background.
    pub fn start_session(self: &Arc<Self>, url: &str, client_key: &str) -> ServerResult<SessionStart> {
        let url = normalize_url(url)?;
        let permit = self.admission.admit(client_key)?;

        let id = Uuid::new_v4().to_string();
        let sink = self.registry.create(&id, client_key, &url);
        let receiver = self
            .registry
            .receiver(&id)
            .ok_or_else(|| ServerError::NotFound(id.clone()))?;
        sink.send(SessionEvent::Session {
            id: id.clone(),
            url: url.clone(),
        });
        info!(session = %id, client = %client_key, url = %url, "Clone started");

        let engine = self.clone();
        let session = id.clone();
        tokio::spawn(async move {
            run_pipeline(engine, session, url, sink, permit).await;
        });

        Ok(SessionStart { id, receiver })
    }

    /// Event queue of a running session.
    pub fn session_events(&self, id: &str) -> ServerResult<SharedReceiver> {
        self.registry
            .receiver(id)
            .ok_or_else(|| ServerError::NotFound(format!("session {}", id)))
    }

    /// Forget a session whose stream delivered `end`.
    pub fn end_session(&self, id: &str) {
        self.registry.remove(id);
    }

    pub async fn get_session(&self, id: &str) -> ServerResult<DurableRecord> {
        self.store
            .get_record(id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("clone {}", id)))
    }

    pub async fn list_sessions(&self, page: usize, page_size: usize) -> ServerResult<Page<DurableRecord>> {
        Ok(self.store.list_records(page, page_size.clamp(1, 100)).await?)
    }

    pub async fn proxy(&self, id: &str, path: &str, query: Option<&str>) -> ProxyResponse {
        self.proxy.proxy(id, path, query).await
    }

    /// Best-effort teardown of the environment of `id`.
    pub async fn delete_environment(&self, id: &str) -> bool {
        let found = self.environments.teardown(id).await;
        debug!(session = %id, found, "Environment delete requested");
        found
    }

    pub async fn preview(&self, id: &str) -> ServerResult<PreviewPage> {
        if self.environments.live(id).is_some() {
            return Ok(PreviewPage::Redirect(format!("{}/", session_prefix(id))));
        }
        let record = self.get_session(id).await?;
        let source = self
            .store
            .get_artifact(id, replica_core::COMPOSITION_PATH)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("page source of {}", id)))?;
        Ok(PreviewPage::Source(static_preview(id, &record.url, &source)))
    }

    /// Evict sessions past their TTL every `interval` until the engine is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.registry.purge_expired(engine.config.pipeline.session_ttl());
            }
        })
    }

    /// Tear down every environment, for shutdown.
    pub async fn shutdown(&self) {
        info!("Tearing down all environments");
        self.environments.teardown_all().await;
    }
}
