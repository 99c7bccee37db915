//! # replica_sandbox
//!
//! Ephemeral preview environments for Replica.
//!
//! Generated projects run inside short-lived environments created through a
//! [`SandboxProvider`]. The [`EnvironmentManager`] drives each one through
//! creation, install, start and health probing, and releases it when it
//! fails or grows too old.
//!
//! # Features
//!
//! - **Docker Provider**: containers via the Docker API (bollard)
//! - **Mock Provider**: for testing without a container runtime
//! - **Scaffold**: built-in Next.js + Tailwind skeleton, or a directory on disk
//! - **Lifecycle**: max-age staleness, invalidation, best-effort teardown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use replica_sandbox::{DockerProvider, EnvironmentConfig, EnvironmentManager, ProjectFile, Scaffold};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(DockerProvider::new().await?);
//!     let manager = EnvironmentManager::new(provider, EnvironmentConfig::default(), Scaffold::builtin());
//!
//!     let files = vec![ProjectFile::new("components/Hero.tsx", "export default function Hero() { return null }")];
//!     let env = manager.provision("demo", &files, |state| println!("{}", state)).await?;
//!     println!("Serving at {}", env.base_url);
//!
//!     manager.teardown("demo").await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod docker;
pub mod environment;
pub mod error;
pub mod mock;
pub mod provider;
pub mod scaffold;

pub use config::EnvironmentConfig;
pub use docker::DockerProvider;
pub use environment::{join_project_path, Environment, EnvironmentManager, EnvironmentState};
pub use error::{SandboxError, SandboxResult};
pub use mock::{CapturedCall, MockProvider};
pub use provider::{ExecOutput, SandboxProvider};
pub use scaffold::{ProjectFile, Scaffold};
