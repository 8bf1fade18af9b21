//! Container runtime boundary used to start tenant sandboxes.

use std::path::PathBuf;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub read_only: bool,
}

impl Mount {
    pub fn read_write(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// `source:target[:ro]` bind string.
    pub fn bind_spec(&self) -> String {
        let mut spec = format!("{}:{}", self.source.display(), self.target.display());
        if self.read_only {
            spec.push_str(":ro");
        }
        spec
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    /// No interfaces besides loopback.
    #[default]
    Isolated,
    /// Runtime default networking.
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub network: NetworkPolicy,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyExists,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to connect to container runtime: {0}")]
    Connect(String),
    #[error("failed to create sandbox '{name}': {reason}")]
    CreateFailed { name: String, reason: String },
    #[error("failed to start sandbox '{name}': {reason}")]
    StartFailed { name: String, reason: String },
}

/// Starts named sandboxes. Starting a sandbox that already exists reports
/// `StartOutcome::AlreadyExists` instead of failing.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, spec: &SandboxSpec) -> Result<StartOutcome, RuntimeError>;
}

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;

#[cfg(feature = "docker")]
mod docker {
    use bollard::Docker;
    use bollard::errors::Error as BollardError;
    use bollard::models::{ContainerCreateBody, HostConfig};
    use bollard::query_parameters::{CreateContainerOptionsBuilder, StartContainerOptions};

    use super::*;

    const CONFLICT: u16 = 409;
    const NOT_MODIFIED: u16 = 304;

    /// Sandbox runtime backed by the local Docker engine.
    pub struct DockerRuntime {
        docker: Docker,
    }

    impl std::fmt::Debug for DockerRuntime {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("DockerRuntime").finish_non_exhaustive()
        }
    }

    impl DockerRuntime {
        pub fn connect() -> Result<Self, RuntimeError> {
            let docker = Docker::connect_with_local_defaults()
                .map_err(|e| RuntimeError::Connect(e.to_string()))?;
            Ok(Self { docker })
        }

        pub fn with_client(docker: Docker) -> Self {
            Self { docker }
        }
    }

    fn status_of(err: &BollardError) -> Option<u16> {
        match err {
            BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    fn network_mode(policy: NetworkPolicy) -> Option<String> {
        match policy {
            NetworkPolicy::Isolated => Some("none".to_owned()),
            NetworkPolicy::Default => None,
        }
    }

    #[async_trait]
    impl ContainerRuntime for DockerRuntime {
        async fn start(&self, spec: &SandboxSpec) -> Result<StartOutcome, RuntimeError> {
            let config = ContainerCreateBody {
                image: Some(spec.image.clone()),
                cmd: if spec.command.is_empty() {
                    None
                } else {
                    Some(spec.command.clone())
                },
                tty: Some(true),
                open_stdin: Some(true),
                host_config: Some(HostConfig {
                    binds: Some(spec.mounts.iter().map(Mount::bind_spec).collect()),
                    network_mode: network_mode(spec.network),
                    ..HostConfig::default()
                }),
                ..ContainerCreateBody::default()
            };

            let created = match self
                .docker
                .create_container(
                    Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                    config,
                )
                .await
            {
                Ok(_) => true,
                Err(err) if status_of(&err) == Some(CONFLICT) => false,
                Err(err) => {
                    return Err(RuntimeError::CreateFailed {
                        name: spec.name.clone(),
                        reason: err.to_string(),
                    });
                }
            };

            match self
                .docker
                .start_container(&spec.name, None::<StartContainerOptions>)
                .await
            {
                Ok(()) if created => Ok(StartOutcome::Started),
                // An existing container that was stopped has just been restarted.
                Ok(()) => Ok(StartOutcome::AlreadyExists),
                Err(err) if status_of(&err) == Some(NOT_MODIFIED) => Ok(StartOutcome::AlreadyExists),
                Err(err) => Err(RuntimeError::StartFailed {
                    name: spec.name.clone(),
                    reason: err.to_string(),
                }),
            }
        }
    }
}
