//! Replica Server
//!
//! Runs clone sessions end to end and serves their previews:
//! - Admission control per client and globally
//! - A background pipeline per session with an SSE progress stream
//! - A reverse proxy that rebuilds lost environments from the durable store
//! - A bounded auto-repair loop against the running preview

pub mod admission;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod pages;
mod pipeline;
pub mod proxy;
pub mod registry;
pub mod repair;
pub mod routes;

pub use admission::{AdmissionController, AdmissionPermit};
pub use config::{
    AdmissionConfig, CaptureConfig, EngineConfig, LlmConfig, PipelineConfig, ProxyConfig,
    RepairConfig,
};
pub use engine::{Engine, EngineServices, PreviewPage, SessionStart};
pub use error::{ServerError, ServerResult};
pub use events::{event_stream, EventSink, GeneratedFile, Phase, SessionEvent, SharedReceiver};
pub use proxy::{PreviewProxy, ProxyOutcome, ProxyResponse, PROXY_PREFIX};
pub use registry::{SessionInfo, SessionRegistry};
pub use repair::{run_repair_loop, Probe, RepairOutcome, RepairRound, RepairStop};
pub use routes::{build_router, serve};
