//! Global CLI options and gateway configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use mcgate_host::GatewayConfig;

/// Options shared by every command. Unset values fall back to the `MCGATE_*` environment
/// and then to the built-in defaults.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Object store endpoint, e.g. http://127.0.0.1:8080/v1 (env: MCGATE_STORE_URL)
    #[arg(long, global = true, env = "MCGATE_STORE_URL")]
    pub store_url: Option<String>,

    /// Store auth token (env: MCGATE_AUTH_TOKEN)
    #[arg(long, global = true, env = "MCGATE_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Per-scope channel root (env: MCGATE_PIPES_DIR)
    #[arg(long, global = true, env = "MCGATE_PIPES_DIR")]
    pub pipes_dir: Option<PathBuf>,

    /// Per-scope handler cache root (env: MCGATE_CACHE_DIR)
    #[arg(long, global = true, env = "MCGATE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Per-scope handler log root (env: MCGATE_LOG_DIR)
    #[arg(long, global = true, env = "MCGATE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Handler response timeout in seconds (env: MCGATE_HANDLER_TIMEOUT_SECS)
    #[arg(long, global = true, env = "MCGATE_HANDLER_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,
}

impl GlobalOpts {
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::from_env();
        if let Some(dir) = &self.pipes_dir {
            config.pipes_dir = dir.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.handler_timeout = Duration::from_secs(secs);
        }
        config
    }
}
