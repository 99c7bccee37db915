//! Shared wiring for the server integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use replica_core::{Capture, CaptureProducer, CoreError, CoreResult, GenerationConfig, Snapshot};
use replica_llm::{RepairService, ScriptedGenerator};
use replica_sandbox::{EnvironmentConfig, EnvironmentManager, ExecOutput, MockProvider, Scaffold};
use replica_server::{Engine, EngineConfig, EngineServices};
use replica_store::MemoryStore;
use tokio::net::TcpListener;

/// Returns the same screenshots for every URL.
pub struct StaticCapture {
    pub snapshots: usize,
}

#[async_trait]
impl CaptureProducer for StaticCapture {
    async fn capture(&self, url: &str) -> CoreResult<Capture> {
        Ok(Capture::new(
            url,
            (0..self.snapshots as u32)
                .map(|i| Snapshot::new("iVBORw0KGgo=", i * 720))
                .collect(),
        ))
    }
}

pub struct UnreachableCapture;

#[async_trait]
impl CaptureProducer for UnreachableCapture {
    async fn capture(&self, _url: &str) -> CoreResult<Capture> {
        Err(CoreError::Capture("browser crashed".to_string()))
    }
}

pub fn file(path: &str, body: &str) -> String {
    format!("=== FILE: {} ===\n{}\n", path, body)
}

/// Config with every wait shortened for tests.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.generation = GenerationConfig::default().retry_delay_secs(0);
    config.environment = EnvironmentConfig::default().health(2, 0);
    config.pipeline.compile_settle_secs = 0;
    config.pipeline.event_timeout_secs = 10;
    config.repair.settle_secs = 0;
    config.proxy.refresh_secs = 1;
    config
}

/// A provider whose runtime answers the health probe.
pub fn healthy_provider(address: &str) -> MockProvider {
    MockProvider::new()
        .with_address(address)
        .on_exec("localhost:3000", ExecOutput::new(0, "200"))
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub provider: MockProvider,
    pub store: Arc<MemoryStore>,
    pub generator: ScriptedGenerator,
}

pub fn harness(
    config: EngineConfig,
    provider: MockProvider,
    generator: ScriptedGenerator,
    capture: Arc<dyn CaptureProducer>,
    repairer: Arc<dyn RepairService>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let environments = Arc::new(EnvironmentManager::new(
        Arc::new(provider.clone()),
        config.environment.clone(),
        Scaffold::builtin(),
    ));
    let engine = Engine::new(
        config,
        EngineServices {
            capture,
            generator: Arc::new(generator.clone()),
            repairer,
            environments,
            store: store.clone(),
        },
    )
    .unwrap();
    Harness {
        engine,
        provider,
        store,
        generator,
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
