//! Backing object store client abstractions plus the trigger metadata codec.

mod http_store;
mod mem_store;
pub mod triggers;

pub use http_store::HttpObjectStore;
pub use mem_store::MemObjectStore;
pub use triggers::{HandlerList, Trigger, TriggerMap, read_triggers, write_triggers};

use async_trait::async_trait;
use std::{collections::BTreeMap, io, path::PathBuf};

pub type StoreResult<T> = Result<T, StoreError>;

/// Header map returned by the store. Keys are lowercased.
pub type Headers = BTreeMap<String, String>;

/// Reply to a metadata-only existence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub status: u16,
    pub headers: Headers,
}

impl ObjectHead {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag").map(|v| v.trim_matches('"'))
    }
}

/// Reply to a full-object read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectBody {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ObjectBody {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The two calls the coordinator makes against the backing object store.
///
/// Both return the store's status code rather than failing on non-2xx replies; errors are
/// reserved for transport failures.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head(&self, account: &str, container: &str, object: &str) -> StoreResult<ObjectHead>;
    async fn get(&self, account: &str, container: &str, object: &str) -> StoreResult<ObjectBody>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid store endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("malformed trigger metadata at {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}
