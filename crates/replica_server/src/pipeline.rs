//! The background pipeline behind one clone session.
//!
//! capture → partition/plan/workers (environment provisioning in parallel)
//! → stitch → compose → upload → repair → persist. Progress goes to the
//! session's [`EventSink`]; the HTTP stream only ever reads the queue.

use std::sync::Arc;

use replica_core::{assemble, generate, Artifact, Capture, CoreError, GenerationEvent, Stitched, WorkerEvent};
use replica_llm::UsageTracker;
use replica_sandbox::{Environment, EnvironmentState};
use replica_store::DurableRecord;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::admission::AdmissionPermit;
use crate::engine::Engine;
use crate::error::{ServerError, ServerResult};
use crate::events::{EventSink, GeneratedFile, Phase, SessionEvent};
use crate::proxy::session_prefix;
use crate::repair::run_repair_loop;

/// Aborts the provisioning task when the pipeline stops caring about it.
struct EnvironmentTask(Option<JoinHandle<ServerResult<Environment>>>);

impl EnvironmentTask {
    async fn join(mut self) -> ServerResult<Environment> {
        let Some(handle) = self.0.take() else {
            return Err(ServerError::Pipeline("Environment task already joined".to_string()));
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Pipeline(format!("Environment task failed: {}", e))),
        }
    }

    /// Abort provisioning and wait until the task has stopped.
    async fn cancel(mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for EnvironmentTask {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// Drive session `id` to exactly one terminal event. The admission permit is
/// held until the pipeline is over.
pub(crate) async fn run_pipeline(
    engine: Arc<Engine>,
    id: String,
    url: String,
    sink: EventSink,
    permit: AdmissionPermit,
) {
    let inner = tokio::spawn(execute(engine.clone(), id.clone(), url, sink.clone()));
    engine.registry.attach_task(&id, inner.abort_handle());

    match inner.await {
        Ok(Ok(files)) => {
            info!(session = %id, files = files.len(), "Clone finished");
            sink.done(format!("{}/", session_prefix(&id)), files);
        }
        Ok(Err(e)) => {
            warn!(session = %id, "Clone failed: {}", e);
            engine.environments.teardown(&id).await;
            sink.fail(e.to_string());
        }
        Err(e) => {
            if e.is_panic() {
                error!(session = %id, "Pipeline panicked");
            } else {
                info!(session = %id, "Pipeline cancelled");
            }
            engine.environments.teardown(&id).await;
            sink.fail("The clone was interrupted");
        }
    }
    drop(permit);
}

async fn execute(engine: Arc<Engine>, id: String, url: String, sink: EventSink) -> ServerResult<Vec<GeneratedFile>> {
    let usage = Arc::new(UsageTracker::new());

    sink.status(Phase::Scraping, format!("Capturing {}", url));
    let capture = engine
        .capture
        .capture(&url)
        .await
        .map_err(|e| ServerError::Pipeline(format!("Capture failed: {}", e)))?;
    if capture.is_empty() {
        return Err(ServerError::Pipeline("Capture returned no screenshots".to_string()));
    }
    if let Some(first) = capture.snapshots.first() {
        sink.send(SessionEvent::Screenshot {
            data: first.data.clone(),
            offset: first.offset,
            total: capture.len(),
        });
    }
    let capture = Arc::new(capture);

    let environment = spawn_environment(&engine, &id, &sink);

    sink.status(
        Phase::Generating,
        format!("Generating code from {} screenshots", capture.len()),
    );
    let mut stitched = match generate_files(&engine, &sink, capture.clone(), usage.clone()).await {
        Ok(stitched) => stitched,
        Err(e) => {
            environment.cancel().await;
            return Err(e);
        }
    };

    match assemble(
        engine.generator.as_ref(),
        &stitched,
        &capture,
        &engine.config.generation,
        &usage,
    )
    .await
    {
        Ok(composition) => {
            if composition.fallback {
                info!(session = %id, "Using the local composition");
            }
            stitched.upsert(composition.artifact);
        }
        Err(CoreError::NothingToCompose) => {
            environment.cancel().await;
            return Err(ServerError::Pipeline("Generation produced no components".to_string()));
        }
        Err(e) => {
            environment.cancel().await;
            return Err(e.into());
        }
    }
    for artifact in &stitched.artifacts {
        sink.send(SessionEvent::FileWrite {
            path: artifact.path.clone(),
            lines: artifact.lines(),
            worker: artifact.worker + 1,
        });
    }

    sink.status(Phase::Deploying, "Waiting for the preview environment");
    let env = environment
        .join()
        .await
        .map_err(|e| ServerError::Pipeline(format!("Preview environment failed: {}", e)))?;

    deploy(&engine, &id, &sink, &stitched).await?;

    if engine.config.repair.enabled {
        sink.status(Phase::Fixing, "Checking the preview for errors");
        let outcome = run_repair_loop(
            &engine.environments,
            &id,
            &env.base_url,
            &mut stitched,
            engine.repairer.as_ref(),
            &engine.client,
            &engine.config.repair,
            |round| {
                sink.send(SessionEvent::Repair {
                    round: round.round,
                    path: round.path.clone(),
                    error: round.error.clone(),
                    fixed: round.fixed,
                })
            },
        )
        .await;
        info!(session = %id, rounds = outcome.rounds.len(), stop = ?outcome.stop, "Repair finished");
    }

    persist(&engine, &id, &url, &stitched).await?;

    sink.send(SessionEvent::Usage {
        summary: usage.summary(),
    });
    Ok(stitched
        .artifacts
        .iter()
        .map(|a| GeneratedFile::new(a.path.clone(), a.content.clone()))
        .collect())
}

fn spawn_environment(engine: &Arc<Engine>, id: &str, sink: &EventSink) -> EnvironmentTask {
    let environments = engine.environments.clone();
    let session = id.to_string();
    let sink = sink.clone();
    let handle = tokio::spawn(async move {
        let env = environments
            .provision(&session, &[], |state| {
                if state == EnvironmentState::Serving {
                    sink.send(SessionEvent::Status {
                        phase: sink.phase(),
                        message: "Preview environment ready".to_string(),
                    });
                }
            })
            .await?;
        Ok(env)
    });
    EnvironmentTask(Some(handle))
}

async fn generate_files(
    engine: &Arc<Engine>,
    sink: &EventSink,
    capture: Arc<Capture>,
    usage: Arc<UsageTracker>,
) -> ServerResult<Stitched> {
    let events = sink.clone();
    let outcome = generate(
        engine.generator.clone(),
        capture,
        &engine.config.generation,
        usage,
        move |event| forward_generation_event(&events, event),
    )
    .await?;

    if outcome.failed_workers() > 0 {
        warn!(
            session = %sink.id(),
            "{} of {} workers failed",
            outcome.failed_workers(),
            outcome.outputs.len()
        );
    }
    if outcome.stitched.is_empty() {
        return Err(ServerError::Pipeline("Generation produced no files".to_string()));
    }
    Ok(outcome.stitched)
}

fn forward_generation_event(sink: &EventSink, event: GenerationEvent) {
    match event {
        GenerationEvent::Partitioned { workers, snapshots } => sink.send(SessionEvent::Status {
            phase: Phase::Generating,
            message: format!("{} workers over {} screenshots", workers, snapshots),
        }),
        GenerationEvent::Planned { plan } => sink.send(SessionEvent::Plan {
            assignments: plan.assignments,
        }),
        GenerationEvent::Worker {
            event:
                WorkerEvent::Started {
                    index,
                    role,
                    snapshots,
                    planned,
                },
        } => sink.send(SessionEvent::WorkerStarted {
            worker: index + 1,
            role: role.to_string(),
            snapshots,
            planned,
        }),
        GenerationEvent::Worker {
            event: WorkerEvent::Finished { index, files, error },
        } => sink.send(SessionEvent::WorkerFinished {
            worker: index + 1,
            files,
            error,
        }),
    }
}

async fn deploy(engine: &Engine, id: &str, sink: &EventSink, stitched: &Stitched) -> ServerResult<()> {
    if !stitched.dependencies.is_empty() {
        sink.status(
            Phase::Deploying,
            format!("Installing {} packages", stitched.dependencies.len()),
        );
        if let Err(e) = engine.environments.install_packages(id, &stitched.dependencies).await {
            warn!(session = %id, "Extra packages failed to install: {}", e);
        }
    }

    sink.status(Phase::Deploying, format!("Uploading {} files", stitched.len()));
    for artifact in &stitched.artifacts {
        upload(engine, id, artifact).await?;
        sink.send(SessionEvent::FileUpload {
            path: artifact.path.clone(),
        });
    }
    tokio::time::sleep(engine.config.pipeline.compile_settle()).await;

    match engine.environments.logs(id, 20).await {
        Ok(tail) if !tail.trim().is_empty() => debug!(session = %id, "Runtime log after upload:\n{}", tail),
        Ok(_) => {}
        Err(e) => debug!(session = %id, "Runtime log unavailable: {}", e),
    }
    Ok(())
}

async fn upload(engine: &Engine, id: &str, artifact: &Artifact) -> ServerResult<()> {
    engine
        .environments
        .upload(id, &artifact.path, &artifact.content)
        .await
        .map_err(|e| ServerError::Pipeline(format!("Uploading {} failed: {}", artifact.path, e)))
}

async fn persist(engine: &Engine, id: &str, url: &str, stitched: &Stitched) -> ServerResult<()> {
    let record = DurableRecord::new(id, url, format!("{}/", session_prefix(id)))
        .with_file_count(stitched.len())
        .with_dependencies(stitched.dependencies.clone());
    for artifact in &stitched.artifacts {
        engine
            .store
            .put_artifact(id, &artifact.path, &artifact.content)
            .await?;
    }
    engine.store.put_record(&record).await?;
    info!(session = %id, files = stitched.len(), "Clone persisted");
    Ok(())
}
