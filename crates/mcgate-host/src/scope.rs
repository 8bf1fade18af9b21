//! Tenant identity derived from the storage account.

use std::path::{Path, PathBuf};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

const SCOPE_START: usize = 5;
const SCOPE_END: usize = 18;
const ACCOUNT_PREFIX: &str = "auth_";

/// A storage account together with the names derived from it.
///
/// The scope is the 13 characters past the account's 5-character prefix and namespaces the
/// sandbox, its channel, its handler cache and its logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tenant {
    account: String,
    account_id: String,
    scope: String,
}

impl Tenant {
    pub fn from_account(account: &str) -> GatewayResult<Self> {
        let end = account.len().min(SCOPE_END);
        let scope = account
            .get(SCOPE_START..end)
            .filter(|s| !s.is_empty() && s.chars().all(is_path_safe))
            .ok_or_else(|| GatewayError::InvalidAccount(account.to_string()))?;

        let account_id = match account.get(..ACCOUNT_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(ACCOUNT_PREFIX) => {
                &account[ACCOUNT_PREFIX.len()..]
            }
            _ => account,
        };
        if !account_id.chars().all(is_path_safe) {
            return Err(GatewayError::InvalidAccount(account.to_string()));
        }

        Ok(Self {
            account: account.to_string(),
            account_id: account_id.to_string(),
            scope: scope.to_string(),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn sandbox_name(&self, config: &GatewayConfig) -> String {
        format!("{}_{}", config.sandbox.name_prefix, self.account_id)
    }

    pub fn sandbox_image(&self, config: &GatewayConfig) -> String {
        format!(
            "{}/{}",
            config.sandbox.image_repo,
            self.account_id.to_ascii_lowercase()
        )
    }

    pub fn pipe_dir(&self, config: &GatewayConfig) -> PathBuf {
        config.pipes_dir.join(&self.scope)
    }

    pub fn channel_path(&self, config: &GatewayConfig) -> PathBuf {
        self.pipe_dir(config).join(&config.channel_name)
    }

    pub fn cache_dir(&self, config: &GatewayConfig) -> PathBuf {
        config.cache_dir.join(&self.scope)
    }

    pub fn log_dir(&self, config: &GatewayConfig) -> PathBuf {
        config.log_dir.join(&self.scope)
    }
}

fn is_path_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Rejects names that could escape the directory they are joined onto.
pub(crate) fn check_component(what: &str, name: &str) -> GatewayResult<()> {
    let path = Path::new(name);
    let single = path.components().count() == 1
        && matches!(path.components().next(), Some(std::path::Component::Normal(_)));
    if name.is_empty() || !single || name.contains('/') {
        return Err(GatewayError::InvalidRequest(format!(
            "{what} '{name}' is not a plain file name"
        )));
    }
    Ok(())
}

/// File name with its last extension removed: `resize.mc` → `resize`.
pub(crate) fn handler_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
