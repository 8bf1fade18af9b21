//! Coordinator entry points used by the storage request path.

use std::fs;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::sync::Arc;

use http::HeaderMap;
use mcgate_store::{HandlerList, Headers, ObjectStore, Trigger, TriggerMap, read_triggers, write_triggers};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::HandlerCache;
use crate::config::GatewayConfig;
use crate::daemon::DaemonSupervisor;
use crate::error::{GatewayResult, io_error};
use crate::handle::{HandlerHandle, metadata_path};
use crate::lifecycle::SandboxManager;
use crate::protocol::{InvocationProtocol, InvocationRequest};
use crate::request::{TriggerAction, sanitize_headers};
use crate::runtime::ContainerRuntime;
use crate::scope::{Tenant, check_component};

/// Object a request addresses, plus where its bytes live on this node.
#[derive(Debug, Clone, Copy)]
pub struct ObjectContext<'a> {
    pub account: &'a str,
    pub container: &'a str,
    pub object: &'a str,
    pub data_file: &'a Path,
}

/// Per-request inputs handed through to the sandbox.
#[derive(Debug, Default)]
pub struct Invocation {
    pub request_headers: HeaderMap,
    pub object_headers: Headers,
    pub input: Option<OwnedFd>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The trigger has no handlers; nothing was contacted.
    Skipped,
    Completed {
        task_id: String,
        result: Option<Value>,
    },
}

pub struct Gateway<S, R> {
    config: Arc<GatewayConfig>,
    cache: HandlerCache<S>,
    sandboxes: SandboxManager<R>,
}

impl<S: ObjectStore, R: ContainerRuntime> Gateway<S, R> {
    /// Gateway sharing the process-wide daemon table.
    pub fn new(config: GatewayConfig, store: Arc<S>, runtime: Arc<R>) -> Self {
        Self::with_supervisor(config, store, runtime, DaemonSupervisor::global())
    }

    pub fn with_supervisor(
        config: GatewayConfig,
        store: Arc<S>,
        runtime: Arc<R>,
        supervisor: Arc<DaemonSupervisor>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            cache: HandlerCache::new(store, config.clone()),
            sandboxes: SandboxManager::new(runtime, supervisor, config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache(&self) -> &HandlerCache<S> {
        &self.cache
    }

    pub fn sandboxes(&self) -> &SandboxManager<R> {
        &self.sandboxes
    }

    /// Applies the trigger assignment or deletion a request carries.
    ///
    /// Returns `Ok(None)` when the request carries no trigger header.
    pub fn apply_trigger_request(
        &self,
        data_file: &Path,
        headers: &HeaderMap,
        body: &[u8],
    ) -> GatewayResult<Option<TriggerMap>> {
        match TriggerAction::from_headers(headers)? {
            Some(action) => apply_trigger_action(data_file, &action, body).map(Some),
            None => Ok(None),
        }
    }

    /// Handlers registered on `trigger`; an object without trigger metadata has none.
    pub fn handlers_for(&self, data_file: &Path, trigger: Trigger) -> GatewayResult<HandlerList> {
        Ok(read_triggers(data_file)?
            .map(|map| map.get(trigger).clone())
            .unwrap_or_default())
    }

    /// Runs the handlers an object has registered for `trigger`.
    pub async fn run_trigger(
        &self,
        object: ObjectContext<'_>,
        trigger: Trigger,
        invocation: Invocation,
    ) -> GatewayResult<TriggerOutcome> {
        let handlers = self.handlers_for(object.data_file, trigger)?;
        if handlers.is_empty() {
            return Ok(TriggerOutcome::Skipped);
        }
        self.execute(object, &handlers, invocation).await
    }

    /// Runs an explicit handler chain against an object.
    ///
    /// Failures leave the object and its trigger metadata untouched; the caller decides
    /// whether the storage operation proceeds.
    pub async fn execute(
        &self,
        object: ObjectContext<'_>,
        handlers: &HandlerList,
        invocation: Invocation,
    ) -> GatewayResult<TriggerOutcome> {
        // Conflicting trigger headers are rejected before any sandbox contact.
        TriggerAction::from_headers(&invocation.request_headers)?;
        if handlers.is_empty() {
            return Ok(TriggerOutcome::Skipped);
        }
        let tenant = Tenant::from_account(object.account)?;

        self.sandboxes.ensure_control_daemon(&tenant).await?;
        self.sandboxes.ensure_sandbox(&tenant).await?;

        let resolution = self.cache.resolve(&tenant, handlers).await?;
        self.cache.mirror_all(&tenant, &resolution.mirrors).await?;

        let object_dir = object_dir(object.data_file);
        let log_root = tenant.log_dir(&self.config);
        let handles = resolution
            .handlers
            .iter()
            .map(|descriptor| HandlerHandle::open(object_dir, &log_root, descriptor))
            .collect::<GatewayResult<Vec<_>>>()?;

        let task_id = Uuid::new_v4().to_string();
        tracing::debug!(
            task_id = %task_id,
            account = object.account,
            container = object.container,
            object = object.object,
            handlers = %handlers,
            "invoking handler chain"
        );
        let request = InvocationRequest {
            task_id: task_id.clone(),
            handlers: resolution.handlers,
            handles,
            request_headers: sanitize_headers(&invocation.request_headers, &self.config.execution_server),
            object_headers: invocation.object_headers,
            input: invocation.input,
        };
        let protocol = InvocationProtocol::new(
            tenant.channel_path(&self.config),
            self.config.handler_timeout,
            self.config.response_chunk_bytes,
        );
        let result = protocol.invoke(request).await?;
        Ok(TriggerOutcome::Completed { task_id, result })
    }
}

/// Rewrites an object's trigger record. An assignment with a non-empty `body` also
/// writes it as each assigned handler's metadata file.
pub fn apply_trigger_action(
    data_file: &Path,
    action: &TriggerAction,
    body: &[u8],
) -> GatewayResult<TriggerMap> {
    if let TriggerAction::Assign { handlers, .. } = action {
        for name in handlers.iter() {
            check_component("handler", name)?;
        }
    }

    let mut map = read_triggers(data_file)?.unwrap_or_default();
    action.apply(&mut map);
    write_triggers(data_file, &map)?;
    tracing::info!(data_file = %data_file.display(), ?action, "trigger metadata updated");

    if let TriggerAction::Assign { handlers, .. } = action {
        if !body.is_empty() {
            let object_dir = object_dir(data_file);
            for name in handlers.iter() {
                let path = metadata_path(object_dir, name);
                fs::write(&path, body).map_err(|e| io_error(&path, e))?;
            }
        }
    }
    Ok(map)
}

fn object_dir(data_file: &Path) -> &Path {
    data_file.parent().unwrap_or_else(|| Path::new("."))
}
