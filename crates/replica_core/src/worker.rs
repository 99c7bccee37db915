//! Generation workers.
//!
//! A worker makes exactly one generation call for its partition, plus one
//! continuation when the reply was cut off at the token limit. A failed call
//! is retried once after a pause; a second failure yields an empty output.
//! Workers never return errors.

use std::sync::Arc;
use std::time::Duration;

use replica_llm::{GenerationRequest, GenerationService, LlmResult, UsageTracker};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::capture::Capture;
use crate::lint::{lint_file, SymbolTable};
use crate::parse::{merge_continuation, parse_files};
use crate::partition::{Partition, Role};
use crate::planner::OwnershipPlan;
use crate::prompts::worker_request;

/// A generated file and the worker that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content: String,
    /// 0-based index of the producing worker
    pub worker: usize,
}

impl Artifact {
    pub fn new(path: impl Into<String>, content: impl Into<String>, worker: usize) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            worker,
        }
    }

    pub fn lines(&self) -> usize {
        self.content.matches('\n').count() + 1
    }
}

/// What one worker produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub index: usize,
    pub artifacts: Vec<Artifact>,
    /// npm packages the worker declared
    pub dependencies: Vec<String>,
    /// The reply was truncated and continued
    pub continued: bool,
    /// Set when the worker gave up
    pub error: Option<String>,
}

/// Progress notifications from dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started {
        index: usize,
        role: Role,
        snapshots: usize,
        planned: Vec<String>,
    },
    Finished {
        index: usize,
        files: Vec<String>,
        error: Option<String>,
    },
}

/// Static inputs shared by every worker of a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub service: Arc<dyn GenerationService>,
    pub capture: Arc<Capture>,
    pub usage: Arc<UsageTracker>,
    pub max_tokens: u32,
    pub retry_delay: Duration,
}

async fn call_with_retry<F, Fut, T>(label: &str, retry_delay: Duration, mut call: F) -> LlmResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = LlmResult<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!("{} call failed, retrying in {:?}: {}", label, retry_delay, first);
            tokio::time::sleep(retry_delay).await;
            call().await
        }
    }
}

/// Run one worker to completion.
pub async fn run_worker(ctx: &WorkerContext, partition: &Partition, planned: &[String]) -> WorkerOutput {
    let label = partition.label();
    let request = worker_request(&ctx.capture, partition, planned, ctx.max_tokens);

    let first = call_with_retry(&label, ctx.retry_delay, || ctx.service.generate(&request)).await;
    let generation = match first {
        Ok(generation) => generation,
        Err(e) => {
            warn!("{} gave up: {}", label, e);
            return WorkerOutput {
                index: partition.index,
                error: Some(e.to_string()),
                ..Default::default()
            };
        }
    };
    ctx.usage.record_generation(&label, &generation);

    let mut text = generation.content;
    let mut continued = false;
    if generation.truncated {
        continued = true;
        debug!("{} truncated after {} chars, continuing", label, text.len());
        match continue_once(ctx, &request, &text).await {
            Ok(rest) => text = merge_continuation(&text, &rest),
            Err(e) => warn!("{} continuation failed, keeping partial output: {}", label, e),
        }
    }

    let parsed = parse_files(&text);
    // Siblings from other workers are resolved after stitching
    let table = SymbolTable::standard().with_component_paths(parsed.files.iter().map(|f| f.path.as_str()));

    let artifacts: Vec<Artifact> = parsed
        .files
        .into_iter()
        .map(|file| {
            let content = lint_file(&file.path, &file.content, &table);
            Artifact::new(file.path, content, partition.index)
        })
        .collect();

    info!(
        "{} produced {} files{}",
        label,
        artifacts.len(),
        if continued { " (continued)" } else { "" }
    );

    WorkerOutput {
        index: partition.index,
        artifacts,
        dependencies: parsed.dependencies,
        continued,
        error: None,
    }
}

async fn continue_once(ctx: &WorkerContext, request: &GenerationRequest, prior: &str) -> LlmResult<String> {
    let label = format!("{}-continue", request.label);
    let generation = ctx.service.continue_generation(request, prior).await?;
    ctx.usage.record_generation(&label, &generation);
    Ok(generation.content)
}

/// Run every partition in parallel. Outputs come back ordered by worker
/// index; `on_event` sees starts and finishes as they happen.
pub async fn dispatch<E>(
    ctx: WorkerContext,
    partitions: &[Partition],
    plan: &OwnershipPlan,
    on_event: E,
) -> Vec<WorkerOutput>
where
    E: Fn(WorkerEvent) + Send + Sync + 'static,
{
    let on_event = Arc::new(on_event);
    let mut set = JoinSet::new();

    for partition in partitions.iter().cloned() {
        let ctx = ctx.clone();
        let planned = plan.for_worker(partition.index).to_vec();
        let on_event = on_event.clone();
        set.spawn(async move {
            on_event(WorkerEvent::Started {
                index: partition.index,
                role: partition.role,
                snapshots: partition.slice.len(),
                planned: planned.clone(),
            });
            let output = run_worker(&ctx, &partition, &planned).await;
            on_event(WorkerEvent::Finished {
                index: partition.index,
                files: output.artifacts.iter().map(|a| a.path.clone()).collect(),
                error: output.error.clone(),
            });
            output
        });
    }

    let mut outputs = Vec::with_capacity(partitions.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(output) => outputs.push(output),
            Err(e) => warn!("Worker task failed: {}", e),
        }
    }
    outputs.sort_by_key(|o| o.index);
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Snapshot;
    use crate::partition::partition;
    use replica_llm::{MockReply, ScriptedGenerator};

    fn context(service: ScriptedGenerator) -> WorkerContext {
        WorkerContext {
            service: Arc::new(service),
            capture: Arc::new(Capture::new(
                "https://example.com",
                (0..3).map(|i| Snapshot::new("AA==", i * 720)).collect(),
            )),
            usage: Arc::new(UsageTracker::new()),
            max_tokens: 16_000,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_parses_and_lints_output() {
        let service = ScriptedGenerator::new().add_reply(MockReply::text(
            "=== FILE: components/Hero.tsx ===\nexport default function Hero() {\n  const [a] = useState(0);\n  return <><Navbar /><Pricing /></>;\n}\n=== FILE: components/layout/Navbar.tsx ===\nexport default function Navbar() { return <nav /> }\n=== DEPENDENCIES: clsx ===\n",
        ));
        let ctx = context(service);
        let parts = partition(3, 1, 5);

        let output = run_worker(&ctx, &parts[0], &["Pricing".to_string()]).await;
        assert_eq!(output.artifacts.len(), 2);
        let hero = &output.artifacts[0].content;
        assert!(hero.contains("import { useState } from \"react\";"));
        assert!(hero.contains("import Navbar from \"@/components/layout/Navbar\";"));
        // not produced by this worker, left for the stitched pass
        assert!(!hero.contains("import Pricing"));
        assert_eq!(output.dependencies, vec!["clsx"]);
        assert_eq!(ctx.usage.summary().calls, 1);
    }

    #[tokio::test]
    async fn test_truncated_reply_is_continued_once() {
        let service = ScriptedGenerator::new()
            .add_reply(MockReply::truncated(
                "=== FILE: components/Footer.tsx ===\nexport default function Footer() {\n  return <footer>",
            ))
            .add_reply(MockReply::text("  return <footer>\n    hi\n  </footer>;\n}\n"));
        let ctx = context(service.clone());
        let parts = partition(3, 1, 5);

        let output = run_worker(&ctx, &parts[2], &[]).await;
        assert!(output.continued);
        assert_eq!(service.calls().len(), 2);
        assert_eq!(service.calls()[1].method, "continue");
        let footer = &output.artifacts[0].content;
        assert_eq!(footer.matches("return <footer>").count(), 1);
        assert!(footer.contains("</footer>"));
    }

    #[tokio::test]
    async fn test_retries_once_then_gives_up() {
        let service = ScriptedGenerator::new().add_reply(MockReply::fail("overloaded"));
        let ctx = context(service.clone());
        let parts = partition(3, 1, 5);

        let output = run_worker(&ctx, &parts[1], &[]).await;
        assert!(output.artifacts.is_empty());
        assert!(output.error.is_some());
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let service = ScriptedGenerator::new()
            .add_reply(MockReply::fail("overloaded"))
            .add_reply(MockReply::text("=== FILE: components/Stats.tsx ===\nexport default function Stats() { return null }\n"));
        let ctx = context(service);
        let parts = partition(3, 1, 5);

        let output = run_worker(&ctx, &parts[1], &[]).await;
        assert_eq!(output.artifacts.len(), 1);
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_orders_outputs_and_reports_events() {
        let service = ScriptedGenerator::new()
            .on_label("worker-1", MockReply::text("=== FILE: components/Navbar.tsx ===\nexport default function Navbar() { return null }\n"))
            .on_label("worker-2", MockReply::fail("down"))
            .on_label("worker-3", MockReply::text("=== FILE: components/Footer.tsx ===\nexport default function Footer() { return null }\n"))
            .with_delay(Duration::from_millis(5));
        let ctx = context(service);
        let parts = partition(3, 1, 5);
        let events = Arc::new(Events::default());

        let sink = events.clone();
        let outputs = dispatch(ctx, &parts, &OwnershipPlan::empty(3), move |e| sink.push(e)).await;

        assert_eq!(outputs.iter().map(|o| o.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(outputs[1].artifacts.is_empty());
        assert_eq!(outputs[2].artifacts[0].path, "components/Footer.tsx");
        let all = events.take();
        assert_eq!(all.iter().filter(|e| matches!(e, WorkerEvent::Started { .. })).count(), 3);
        assert_eq!(all.iter().filter(|e| matches!(e, WorkerEvent::Finished { .. })).count(), 3);
    }

    #[derive(Default)]
    struct Events(std::sync::Mutex<Vec<WorkerEvent>>);

    impl Events {
        fn push(&self, event: WorkerEvent) {
            self.0.lock().unwrap().push(event);
        }

        fn take(&self) -> Vec<WorkerEvent> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }
}
