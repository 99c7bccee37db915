//! One generation run: partition, plan, dispatch, stitch.

use std::sync::Arc;

use replica_llm::{GenerationService, UsageTracker};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capture::Capture;
use crate::config::GenerationConfig;
use crate::error::{CoreError, CoreResult};
use crate::lint::{lint_file, SymbolTable};
use crate::partition::{partition, Partition};
use crate::planner::{plan, OwnershipPlan};
use crate::stitch::{stitch, Stitched};
use crate::worker::{dispatch, WorkerContext, WorkerEvent, WorkerOutput};

/// Progress of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationEvent {
    Partitioned { workers: usize, snapshots: usize },
    Planned { plan: OwnershipPlan },
    Worker { event: WorkerEvent },
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub partitions: Vec<Partition>,
    pub plan: OwnershipPlan,
    pub outputs: Vec<WorkerOutput>,
    pub stitched: Stitched,
}

impl GenerationOutcome {
    pub fn failed_workers(&self) -> usize {
        self.outputs.iter().filter(|o| o.error.is_some()).count()
    }
}

/// Run generation over a capture. Individual worker failures are absorbed;
/// the result may be empty.
pub async fn generate<E>(
    service: Arc<dyn GenerationService>,
    capture: Arc<Capture>,
    config: &GenerationConfig,
    usage: Arc<UsageTracker>,
    on_event: E,
) -> CoreResult<GenerationOutcome>
where
    E: Fn(GenerationEvent) + Send + Sync + 'static,
{
    if capture.is_empty() {
        return Err(CoreError::EmptyCapture);
    }

    let partitions = partition(capture.len(), config.snapshots_per_worker, config.worker_cap);
    let workers = partitions.len();
    info!("Splitting {} snapshots across {} workers", capture.len(), workers);
    on_event(GenerationEvent::Partitioned {
        workers,
        snapshots: capture.len(),
    });

    let plan = if config.planner_enabled && workers > 1 {
        plan(service.as_ref(), &capture, workers, config.planner_sample, &usage).await
    } else {
        OwnershipPlan::empty(workers)
    };
    if !plan.is_empty() {
        on_event(GenerationEvent::Planned { plan: plan.clone() });
    }

    let ctx = WorkerContext {
        service,
        capture,
        usage,
        max_tokens: config.max_output_tokens,
        retry_delay: config.retry_delay(),
    };
    let on_event = Arc::new(on_event);
    let forward = on_event.clone();
    let outputs = dispatch(ctx, &partitions, &plan, move |event| forward(GenerationEvent::Worker { event })).await;

    let mut stitched = stitch(&outputs);
    resolve_sibling_imports(&mut stitched);
    Ok(GenerationOutcome {
        partitions,
        plan,
        outputs,
        stitched,
    })
}

/// Add imports for components another worker produced.
fn resolve_sibling_imports(stitched: &mut Stitched) {
    let table = SymbolTable::standard().with_component_paths(stitched.paths());
    for artifact in &mut stitched.artifacts {
        artifact.content = lint_file(&artifact.path, &artifact.content, &table);
    }
}
