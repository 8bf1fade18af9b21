//! Keeps exactly one sandbox and one control daemon alive per tenant scope.

use std::fs;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::daemon::{DaemonStatus, DaemonSupervisor};
use crate::error::{GatewayError, GatewayResult, io_error};
use crate::runtime::{ContainerRuntime, Mount, NetworkPolicy, SandboxSpec, StartOutcome};
use crate::scope::Tenant;

pub struct SandboxManager<R> {
    runtime: Arc<R>,
    supervisor: Arc<DaemonSupervisor>,
    config: Arc<GatewayConfig>,
}

impl<R: ContainerRuntime> SandboxManager<R> {
    pub fn new(
        runtime: Arc<R>,
        supervisor: Arc<DaemonSupervisor>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            runtime,
            supervisor,
            config,
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Starts the scope's control daemon unless one is already supervised. Returns `None`
    /// when daemon supervision is disabled.
    pub async fn ensure_control_daemon(&self, tenant: &Tenant) -> GatewayResult<Option<DaemonStatus>> {
        let Some(daemon) = self.config.daemon.as_ref() else {
            return Ok(None);
        };
        let pipe_dir = tenant.pipe_dir(&self.config);
        fs::create_dir_all(&pipe_dir).map_err(|e| io_error(&pipe_dir, e))?;
        let channel = pipe_dir.join(&daemon.channel_name);
        let status = self
            .supervisor
            .ensure(tenant.scope(), daemon, &channel)
            .await
            .map_err(|source| GatewayError::ControlDaemon {
                scope: tenant.scope().to_string(),
                source,
            })?;
        Ok(Some(status))
    }

    /// Idempotently starts the tenant's sandbox.
    pub async fn ensure_sandbox(&self, tenant: &Tenant) -> GatewayResult<StartOutcome> {
        for dir in [tenant.pipe_dir(&self.config), tenant.cache_dir(&self.config)] {
            fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        }
        let spec = self.sandbox_spec(tenant);
        let outcome = self
            .runtime
            .start(&spec)
            .await
            .map_err(|source| GatewayError::SandboxUnavailable {
                name: spec.name.clone(),
                source,
            })?;
        match outcome {
            StartOutcome::Started => tracing::info!(sandbox = %spec.name, image = %spec.image, "sandbox started"),
            StartOutcome::AlreadyExists => tracing::debug!(sandbox = %spec.name, "sandbox already running"),
        }
        Ok(outcome)
    }

    pub fn sandbox_spec(&self, tenant: &Tenant) -> SandboxSpec {
        let sandbox = &self.config.sandbox;
        SandboxSpec {
            name: tenant.sandbox_name(&self.config),
            image: tenant.sandbox_image(&self.config),
            mounts: vec![
                Mount::read_write(tenant.pipe_dir(&self.config), &sandbox.channel_mount),
                Mount::read_write(tenant.cache_dir(&self.config), &sandbox.handler_mount),
            ],
            network: NetworkPolicy::Isolated,
            command: sandbox.command.clone(),
        }
    }
}
