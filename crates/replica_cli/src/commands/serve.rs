//! Serve command - Run the HTTP API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use replica_core::{CaptureProducer, DirectoryCaptureProducer, HttpCaptureProducer};
use replica_llm::LlmAdapter;
use replica_sandbox::{DockerProvider, EnvironmentManager, Scaffold};
use replica_server::{Engine, EngineConfig, EngineServices};
use replica_store::FsStore;

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(short, long)]
    bind: Option<String>,

    /// Root directory of the durable store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Base URL of an HTTP capture service
    #[arg(long, conflicts_with = "capture_dir")]
    capture_url: Option<String>,

    /// Directory of recorded capture bundles
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// Maximum concurrent clone sessions
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Disable the auto-repair loop
    #[arg(long)]
    no_repair: bool,
}

impl ServeArgs {
    fn apply(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(bind) = &self.bind {
            config = config.bind(bind.clone());
        }
        if let Some(dir) = &self.data_dir {
            config = config.data_dir(dir.clone());
        }
        if let Some(url) = &self.capture_url {
            config = config.capture_endpoint(url.clone());
            config.capture.dir = None;
        }
        if let Some(dir) = &self.capture_dir {
            config = config.capture_dir(dir.clone());
            config.capture.endpoint = None;
        }
        if let Some(max) = self.max_concurrent {
            config = config.max_concurrent(max);
        }
        if self.no_repair {
            config.repair.enabled = false;
        }
        config
    }
}

pub async fn execute(args: ServeArgs, config_path: Option<&Path>) -> Result<()> {
    let config = args.apply(EngineConfig::load(config_path)?);
    config.validate()?;

    let capture = capture_producer(&config)?;

    let adapter = Arc::new(
        LlmAdapter::from_env()
            .context("Generation service credentials missing")?
            .with_timeout(Duration::from_secs(config.llm.timeout_secs))
            .with_max_attempts(config.llm.max_attempts),
    );
    info!(provider = ?adapter.provider(), "Generation service ready");

    let provider = DockerProvider::new().await?;
    let scaffold = Scaffold::resolve(config.environment.template_dir.as_deref())?;
    let environments = Arc::new(EnvironmentManager::new(
        Arc::new(provider),
        config.environment.clone(),
        scaffold,
    ));

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Cannot create store directory {}", config.data_dir.display()))?;
    let store = Arc::new(FsStore::new(&config.data_dir));

    let engine = Engine::new(
        config,
        EngineServices {
            capture,
            generator: adapter.clone(),
            repairer: adapter,
            environments,
            store,
        },
    )?;

    replica_server::serve(engine).await?;
    Ok(())
}

fn capture_producer(config: &EngineConfig) -> Result<Arc<dyn CaptureProducer>> {
    if let Some(endpoint) = &config.capture.endpoint {
        info!("Capturing through {}", endpoint);
        return Ok(Arc::new(HttpCaptureProducer::new(endpoint.clone())?));
    }
    if let Some(dir) = &config.capture.dir {
        info!("Capturing from recorded bundles in {}", dir.display());
        return Ok(Arc::new(DirectoryCaptureProducer::new(dir)));
    }
    anyhow::bail!("No capture source configured: pass --capture-url or --capture-dir")
}
