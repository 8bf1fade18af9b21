//! `mcgate sandbox ensure`

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use mcgate_host::scope::Tenant;
use mcgate_host::{DaemonStatus, DaemonSupervisor, DockerRuntime, SandboxManager, StartOutcome};
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct SandboxArgs {
    /// Storage account, e.g. AUTH_bd34c4073b65412ab
    #[arg(long)]
    pub account: String,
}

pub async fn cmd_ensure(opts: &GlobalOpts, args: &SandboxArgs) -> Result<()> {
    let config = Arc::new(opts.gateway_config());
    let tenant = Tenant::from_account(&args.account)?;
    let runtime = Arc::new(DockerRuntime::connect().context("connect to container runtime")?);
    let manager = SandboxManager::new(runtime, DaemonSupervisor::global(), config.clone());

    let daemon = manager.ensure_control_daemon(&tenant).await?;
    let outcome = manager.ensure_sandbox(&tenant).await?;

    print_success(
        opts,
        json!({
            "scope": tenant.scope(),
            "sandbox": tenant.sandbox_name(&config),
            "image": tenant.sandbox_image(&config),
            "outcome": match outcome {
                StartOutcome::Started => "started",
                StartOutcome::AlreadyExists => "already_exists",
            },
            "daemon": daemon.map(|status| match status {
                DaemonStatus::Started => "started",
                DaemonStatus::AlreadyRunning => "already_running",
            }),
        }),
    )
}
