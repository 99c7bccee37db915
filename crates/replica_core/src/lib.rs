//! # replica_core
//!
//! Turns a page capture into a set of Next.js source files.
//!
//! 1. [`partition`] splits the snapshots across up to `worker_cap` workers,
//!    each seeing one neighbouring snapshot on every open side.
//! 2. [`planner`] optionally assigns component names per worker.
//! 3. [`worker`] runs one generation call per partition in parallel,
//!    continuing truncated replies once and linting the parsed files.
//! 4. [`stitch`] resolves paths produced by more than one worker.
//! 5. [`compose`] writes `app/page.tsx`, by model or by a local fallback.
//!
//! [`generate::generate`] chains steps 1 to 4.

pub mod capture;
pub mod compose;
pub mod config;
pub mod error;
pub mod generate;
pub mod lint;
pub mod parse;
pub mod partition;
pub mod planner;
pub mod prompts;
pub mod stitch;
pub mod worker;

pub use capture::{
    normalize_url, Capture, CaptureHints, CaptureProducer, DirectoryCaptureProducer,
    HttpCaptureProducer, Snapshot,
};
pub use compose::{assemble, fallback_composition, validate_composition, Composition};
pub use config::GenerationConfig;
pub use error::{CoreError, CoreResult};
pub use generate::{generate, GenerationEvent, GenerationOutcome};
pub use lint::{lint_file, SymbolTable};
pub use parse::{merge_continuation, parse_files, ParsedFile};
pub use partition::{partition, worker_count, Partition, Role};
pub use planner::OwnershipPlan;
pub use stitch::{stitch, Stitched, COMPOSITION_PATH};
pub use worker::{Artifact, WorkerEvent, WorkerOutput};
