use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Label injected as `X-Current-Server` into the headers handed to the sandbox.
    pub execution_server: String,
    /// Upper bound on the wait for a sandbox response.
    pub handler_timeout: Duration,
    /// Store container holding handler objects.
    pub handler_container: String,
    /// Store container holding handler dependencies.
    pub dependency_container: String,
    /// Per-scope channel directories live under this root.
    pub pipes_dir: PathBuf,
    /// Per-scope handler mirrors live under this root.
    pub cache_dir: PathBuf,
    /// Per-scope handler logs live under this root.
    pub log_dir: PathBuf,
    /// File name of the control-plane socket inside a scope's pipe directory.
    pub channel_name: String,
    /// Largest response payload read back from the sandbox.
    pub response_chunk_bytes: usize,
    /// Skip refetching a mirrored object when its ETag and content hash still match.
    pub reuse_verified_mirrors: bool,
    pub sandbox: SandboxConfig,
    /// Control daemon launch settings (None disables daemon supervision).
    pub daemon: Option<DaemonConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            execution_server: "object".into(),
            handler_timeout: Duration::from_secs(10),
            handler_container: "handler".into(),
            dependency_container: "dependency".into(),
            pipes_dir: PathBuf::from("/var/lib/mcgate/pipes/scopes"),
            cache_dir: PathBuf::from("/var/lib/mcgate/handlers/scopes"),
            log_dir: PathBuf::from("/var/log/mcgate/scopes"),
            channel_name: "mc_pipe".into(),
            response_chunk_bytes: 1024,
            reuse_verified_mirrors: true,
            sandbox: SandboxConfig::default(),
            daemon: None,
        }
    }
}

impl GatewayConfig {
    /// Build the config from `MCGATE_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_string("MCGATE_EXECUTION_SERVER") {
            config.execution_server = v;
        }
        if let Some(secs) = env_string("MCGATE_HANDLER_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.handler_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env_string("MCGATE_HANDLER_CONTAINER") {
            config.handler_container = v;
        }
        if let Some(v) = env_string("MCGATE_DEPENDENCY_CONTAINER") {
            config.dependency_container = v;
        }
        if let Some(v) = env_string("MCGATE_PIPES_DIR") {
            config.pipes_dir = v.into();
        }
        if let Some(v) = env_string("MCGATE_CACHE_DIR") {
            config.cache_dir = v.into();
        }
        if let Some(v) = env_string("MCGATE_LOG_DIR") {
            config.log_dir = v.into();
        }
        if let Some(v) = env_string("MCGATE_CHANNEL_NAME") {
            config.channel_name = v;
        }
        if let Some(bytes) = env_string("MCGATE_RESPONSE_CHUNK_BYTES").and_then(|v| v.parse().ok()) {
            config.response_chunk_bytes = bytes;
        }
        if let Some(v) = env_string("MCGATE_IMAGE_REPO") {
            config.sandbox.image_repo = v;
        }
        if let Some(v) = env_string("MCGATE_SANDBOX_PREFIX") {
            config.sandbox.name_prefix = v;
        }
        config.daemon = DaemonConfig::from_env();
        config
    }
}

/// How tenant sandboxes are named and wired.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub name_prefix: String,
    /// Image repository; the tenant image is `<repo>/<account id>`.
    pub image_repo: String,
    /// Where the scope's pipe directory appears inside the sandbox.
    pub channel_mount: PathBuf,
    /// Where the scope's handler cache appears inside the sandbox.
    pub handler_mount: PathBuf,
    /// Command the sandbox runs to start its daemon.
    pub command: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            name_prefix: "mcgate".into(),
            image_repo: "localhost:5001".into(),
            channel_mount: PathBuf::from("/mnt/channels"),
            handler_mount: PathBuf::from("/home/handlers"),
            command: vec!["/home/handlers/start_daemon.sh".into()],
        }
    }
}

/// Host-side control daemon launched once per scope.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub program: PathBuf,
    /// Arguments placed before the channel path.
    pub args: Vec<String>,
    /// File name of the daemon's socket inside the scope's pipe directory.
    pub channel_name: String,
    /// Pause after a launch before the daemon is assumed ready.
    pub settle: Duration,
}

impl DaemonConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            channel_name: "internal_client_pipe".into(),
            settle: Duration::from_secs(1),
        }
    }

    /// `MCGATE_DAEMON_PROGRAM` enables supervision; `MCGATE_DAEMON_ARGS` is whitespace split.
    pub fn from_env() -> Option<Self> {
        let program = env_string("MCGATE_DAEMON_PROGRAM")?;
        let mut daemon = Self::new(program);
        if let Some(args) = env_string("MCGATE_DAEMON_ARGS") {
            daemon.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = env_string("MCGATE_DAEMON_CHANNEL") {
            daemon.channel_name = v;
        }
        if let Some(ms) = env_string("MCGATE_DAEMON_SETTLE_MS").and_then(|v| v.parse().ok()) {
            daemon.settle = Duration::from_millis(ms);
        }
        Some(daemon)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
