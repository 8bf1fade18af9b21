//! Supervised control-daemon processes, one per tenant scope.
//!
//! The table is process-wide: [`DaemonSupervisor::global`] is created on first use and
//! entries are added on the first invocation for a scope. Children are spawned with
//! `kill_on_drop`, so they go away with the supervisor; [`DaemonSupervisor::shutdown`]
//! stops them explicitly during host teardown.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::DaemonConfig;

static GLOBAL: Lazy<Arc<DaemonSupervisor>> = Lazy::new(|| Arc::new(DaemonSupervisor::new()));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug)]
struct Supervised {
    child: Child,
    /// End of the post-launch settle interval.
    ready_at: Instant,
}

#[derive(Debug, Default)]
pub struct DaemonSupervisor {
    children: Mutex<HashMap<String, Supervised>>,
}

impl DaemonSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<DaemonSupervisor> {
        GLOBAL.clone()
    }

    /// Launches the daemon for `scope` unless a live one is already tracked.
    ///
    /// A tracked process that has exited is replaced. Every caller returns only after the
    /// daemon's settle interval has elapsed, including callers that find it still settling.
    pub async fn ensure(
        &self,
        scope: &str,
        config: &DaemonConfig,
        channel: &Path,
    ) -> std::io::Result<DaemonStatus> {
        let (status, ready_at) = {
            let mut children = self.children.lock().await;
            let running = match children.get_mut(scope) {
                Some(entry) => match entry.child.try_wait() {
                    Ok(None) => Some(entry.ready_at),
                    Ok(Some(status)) => {
                        tracing::warn!(scope, %status, "control daemon exited; relaunching");
                        None
                    }
                    Err(err) => {
                        tracing::warn!(scope, error = %err, "control daemon state unknown; relaunching");
                        None
                    }
                },
                None => None,
            };

            match running {
                Some(ready_at) => (DaemonStatus::AlreadyRunning, ready_at),
                None => {
                    children.remove(scope);
                    let child = Command::new(&config.program)
                        .args(&config.args)
                        .arg(channel)
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .kill_on_drop(true)
                        .spawn()?;
                    tracing::info!(scope, pid = ?child.id(), program = %config.program.display(), "control daemon started");
                    let ready_at = Instant::now() + config.settle;
                    children.insert(scope.to_string(), Supervised { child, ready_at });
                    (DaemonStatus::Started, ready_at)
                }
            }
        };

        tokio::time::sleep_until(ready_at).await;
        Ok(status)
    }

    pub async fn is_running(&self, scope: &str) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(scope) {
            Some(entry) => matches!(entry.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Stops every supervised daemon.
    pub async fn shutdown(&self) {
        let mut children = self.children.lock().await;
        for (scope, mut entry) in children.drain() {
            if let Err(err) = entry.child.kill().await {
                tracing::warn!(scope, error = %err, "failed to stop control daemon");
            }
        }
    }
}
