//! Docker implementation of SandboxProvider.
//!
//! Each environment is a long-lived container idling on `sleep infinity`;
//! everything else happens through exec sessions.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SandboxError, SandboxResult};
use crate::provider::{ExecOutput, SandboxProvider};

/// Label set on every container this provider creates.
pub const MANAGED_LABEL: &str = "dev.replica.managed";

/// Docker-based sandbox provider.
pub struct DockerProvider {
    client: Docker,
    /// Host interface published ports bind to
    host_ip: String,
    /// Resolved project directory per handle
    project_dirs: RwLock<HashMap<String, String>>,
}

impl DockerProvider {
    /// Connect to the local Docker daemon.
    pub async fn new() -> SandboxResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DockerNotAvailable(e.to_string()))?;

        // Verify connection
        client
            .ping()
            .await
            .map_err(|e| SandboxError::DockerNotAvailable(e.to_string()))?;

        Ok(Self::from_client(client))
    }

    /// Create with custom Docker host.
    pub async fn with_host(host: &str) -> SandboxResult<Self> {
        let client = Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)?;
        client.ping().await?;
        Ok(Self::from_client(client))
    }

    fn from_client(client: Docker) -> Self {
        Self {
            client,
            host_ip: "127.0.0.1".to_string(),
            project_dirs: RwLock::new(HashMap::new()),
        }
    }

    /// Bind published ports to a different host interface.
    pub fn host_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_ip = ip.into();
        self
    }

    /// Every container carrying [`MANAGED_LABEL`], running or not.
    pub async fn managed_handles(&self) -> SandboxResult<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);
        let containers = self
            .client
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                c.names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .or(c.id)
            })
            .collect())
    }

    fn container_name() -> String {
        format!("replica-{}", &Uuid::new_v4().simple().to_string()[..12])
    }

    async fn ensure_image(&self, image: &str) -> SandboxResult<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Pulling image {}", image);
        let (name, tag) = match image.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (image, "latest"),
        };
        let options = CreateImageOptions {
            from_image: name,
            tag,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(SandboxError::Provider(format!("pull {}: {}", image, e))),
            }
        }
        Ok(())
    }

    /// Run `cmd` in an exec session, feeding `stdin` when given.
    async fn run_exec(
        &self,
        handle: &str,
        cmd: Vec<String>,
        stdin: Option<&[u8]>,
    ) -> SandboxResult<ExecOutput> {
        let exec = self
            .client
            .create_exec(
                handle,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    attach_stdin: Some(stdin.is_some()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_missing(handle, e))?;

        let mut output = String::new();
        match self.client.start_exec(&exec.id, None).await? {
            StartExecResults::Attached {
                output: mut stream,
                mut input,
            } => {
                if let Some(bytes) = stdin {
                    input.write_all(bytes).await?;
                    input.shutdown().await?;
                }
                while let Some(chunk) = stream.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                            output.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        Ok(ExecOutput::new(inspect.exit_code.unwrap_or(-1), output))
    }
}

fn map_missing(handle: &str, error: bollard::errors::Error) -> SandboxError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => SandboxError::UnknownHandle(handle.to_string()),
        other => other.into(),
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create(&self, image: &str, port: u16) -> SandboxResult<String> {
        self.ensure_image(image).await?;

        let name = Self::container_name();
        let port_key = format!("{}/tcp", port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some(self.host_ip.clone()),
                // Empty host port lets the daemon pick a free one
                host_port: Some(String::new()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.delete(&container.id).await;
            return Err(e.into());
        }

        info!(container = %name, image, "Created sandbox container");
        Ok(container.id)
    }

    async fn upload(&self, handle: &str, path: &str, bytes: &[u8]) -> SandboxResult<()> {
        if !path.starts_with('/') {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"mkdir -p "$(dirname "$1")" && cat > "$1""#.to_string(),
            "sh".to_string(),
            path.to_string(),
        ];
        let result = self.run_exec(handle, cmd, Some(bytes)).await?;
        if !result.success() {
            return Err(SandboxError::CommandFailed {
                command: format!("upload {}", path),
                exit_code: result.exit_code,
                output: result.output,
            });
        }
        Ok(())
    }

    async fn exec(&self, handle: &str, command: &str, limit: Duration) -> SandboxResult<ExecOutput> {
        debug!(handle, command, "exec");
        let cmd = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        match timeout(limit, self.run_exec(handle, cmd, None)).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::Timeout(command.to_string(), limit.as_secs())),
        }
    }

    async fn routable_address(&self, handle: &str, port: u16) -> SandboxResult<String> {
        let inspect = self
            .client
            .inspect_container(handle, None)
            .await
            .map_err(|e| map_missing(handle, e))?;

        let key = format!("{}/tcp", port);
        let host_port = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(&key).cloned().flatten())
            .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SandboxError::Provider(format!("port {} not published", port)))?;

        Ok(format!("http://{}:{}", self.host_ip, host_port))
    }

    async fn project_dir(&self, handle: &str) -> SandboxResult<String> {
        if let Some(dir) = self.project_dirs.read().get(handle) {
            return Ok(dir.clone());
        }
        let home = self
            .exec(handle, r#"printf %s "$HOME""#, Duration::from_secs(10))
            .await?;
        let home = home.output.trim();
        let home = if home.is_empty() { "/root" } else { home };
        let dir = format!("{}/project", home.trim_end_matches('/'));
        self.project_dirs
            .write()
            .insert(handle.to_string(), dir.clone());
        Ok(dir)
    }

    async fn delete(&self, handle: &str) -> SandboxResult<()> {
        self.project_dirs.write().remove(handle);
        match self
            .client
            .remove_container(
                handle,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                warn!(handle, "Container already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
