//! Handler access verification and the per-scope mirror of handler code.
//!
//! Every invocation checks the store for each handler and dependency before anything is
//! mirrored; a mirror on disk is never trusted on its own. Mirrored bytes land in
//! `<cache_dir>/<scope>/<main>/<object>` through a temp file in the same directory, so a
//! concurrent reader sees either the previous copy or the complete new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::try_join_all;
use mcgate_store::{HandlerList, ObjectHead, ObjectStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult, MissingKind, io_error};
use crate::scope::{Tenant, check_component};

pub const MAIN_HEADER: &str = "X-Object-Meta-Handler-Main";
pub const DEPENDENCY_HEADER: &str = "X-Object-Meta-Handler-Library-Dependency";

/// What the sandbox needs to know about one handler, read from the handler object's
/// store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    pub name: String,
    pub main: String,
    pub dependencies: Vec<String>,
}

/// One object to copy into the scope's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    pub kind: MissingKind,
    pub container: String,
    pub object: String,
    /// Cache subdirectory; dependencies share their handler's.
    pub main: String,
    pub etag: Option<String>,
}

/// Outcome of verifying a handler list.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub handlers: Vec<HandlerDescriptor>,
    pub mirrors: Vec<MirrorEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MirrorStamp {
    etag: String,
    sha256: String,
}

pub struct HandlerCache<S> {
    store: Arc<S>,
    config: Arc<GatewayConfig>,
}

impl<S> Clone for HandlerCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ObjectStore> HandlerCache<S> {
    pub fn new(store: Arc<S>, config: Arc<GatewayConfig>) -> Self {
        Self { store, config }
    }

    /// Metadata-only existence check. Anything but a 2xx reply is `NotFound`.
    pub async fn verify_access(
        &self,
        tenant: &Tenant,
        kind: MissingKind,
        container: &str,
        name: &str,
    ) -> GatewayResult<ObjectHead> {
        check_component(&kind.to_string(), name)?;
        let head = self.store.head(tenant.account(), container, name).await?;
        if !head.is_success() {
            tracing::debug!(
                account = tenant.account(),
                container,
                name,
                status = head.status,
                "store object not accessible"
            );
            return Err(GatewayError::NotFound {
                kind,
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        Ok(head)
    }

    /// Verifies every handler, then every dependency, in listed order. Stops at the first
    /// miss; nothing is mirrored by this call.
    pub async fn resolve(&self, tenant: &Tenant, names: &HandlerList) -> GatewayResult<Resolution> {
        let handler_container = &self.config.handler_container;
        let dependency_container = &self.config.dependency_container;
        let mut resolution = Resolution::default();

        for name in names.iter() {
            let head = self
                .verify_access(tenant, MissingKind::Handler, handler_container, name)
                .await?;
            let descriptor = describe(name, &head)?;
            resolution.mirrors.push(MirrorEntry {
                kind: MissingKind::Handler,
                container: handler_container.clone(),
                object: name.to_string(),
                main: descriptor.main.clone(),
                etag: head.etag().map(str::to_string),
            });
            resolution.handlers.push(descriptor);
        }

        for descriptor in &resolution.handlers {
            for dependency in &descriptor.dependencies {
                let head = self
                    .verify_access(
                        tenant,
                        MissingKind::Dependency,
                        dependency_container,
                        dependency,
                    )
                    .await?;
                resolution.mirrors.push(MirrorEntry {
                    kind: MissingKind::Dependency,
                    container: dependency_container.clone(),
                    object: dependency.clone(),
                    main: descriptor.main.clone(),
                    etag: head.etag().map(str::to_string),
                });
            }
        }
        Ok(resolution)
    }

    /// Mirrors every entry concurrently. The first failure wins.
    pub async fn mirror_all(&self, tenant: &Tenant, entries: &[MirrorEntry]) -> GatewayResult<()> {
        try_join_all(entries.iter().map(|entry| self.mirror(tenant, entry))).await?;
        Ok(())
    }

    /// Copies one object into the scope's cache and returns its local path.
    pub async fn mirror(&self, tenant: &Tenant, entry: &MirrorEntry) -> GatewayResult<PathBuf> {
        let dir = tenant.cache_dir(&self.config).join(&entry.main);
        let dest = dir.join(&entry.object);

        if let Some(etag) = entry.etag.as_deref() {
            if self.config.reuse_verified_mirrors && mirror_is_current(&dest, etag) {
                tracing::debug!(path = %dest.display(), etag, "reusing verified mirror");
                return Ok(dest);
            }
        }

        let object = self
            .store
            .get(tenant.account(), &entry.container, &entry.object)
            .await?;
        if !object.is_success() {
            return Err(GatewayError::NotFound {
                kind: entry.kind,
                container: entry.container.clone(),
                name: entry.object.clone(),
            });
        }

        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        write_atomically(&dir, &dest, &object.body)?;
        if let Some(etag) = entry.etag.as_deref() {
            let stamp = MirrorStamp {
                etag: etag.to_string(),
                sha256: sha256_hex(&object.body),
            };
            let bytes = serde_json::to_vec(&stamp).map_err(|e| {
                io_error(stamp_path(&dest), std::io::Error::other(e))
            })?;
            write_atomically(&dir, &stamp_path(&dest), &bytes)?;
        }
        tracing::debug!(
            path = %dest.display(),
            bytes = object.body.len(),
            "mirrored {} '{}'",
            entry.kind,
            entry.object
        );
        Ok(dest)
    }
}

fn describe(name: &str, head: &ObjectHead) -> GatewayResult<HandlerDescriptor> {
    let main = head
        .header(MAIN_HEADER)
        .map(str::trim)
        .filter(|main| !main.is_empty())
        .ok_or_else(|| GatewayError::InvalidHandler {
            name: name.to_string(),
            reason: format!("missing {MAIN_HEADER}"),
        })?;
    check_component("handler main", main).map_err(|_| GatewayError::InvalidHandler {
        name: name.to_string(),
        reason: format!("main '{main}' is not a plain name"),
    })?;

    let dependencies = head
        .header(DEPENDENCY_HEADER)
        .map(|raw| HandlerList::parse(raw).names().to_vec())
        .unwrap_or_default();

    Ok(HandlerDescriptor {
        name: name.to_string(),
        main: main.to_string(),
        dependencies,
    })
}

fn stamp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.stamp"))
}

fn mirror_is_current(dest: &Path, etag: &str) -> bool {
    let Ok(raw) = fs::read(stamp_path(dest)) else {
        return false;
    };
    let Ok(stamp) = serde_json::from_slice::<MirrorStamp>(&raw) else {
        return false;
    };
    if stamp.etag != etag {
        return false;
    }
    match fs::read(dest) {
        Ok(bytes) => sha256_hex(&bytes) == stamp.sha256,
        Err(_) => false,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn write_atomically(dir: &Path, dest: &Path, bytes: &[u8]) -> GatewayResult<()> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    tmp.write_all(bytes).map_err(|e| io_error(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| io_error(dest, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcgate_store::MemObjectStore;
    use tempfile::TempDir;

    const ACCOUNT: &str = "AUTH_bd34c4073b65412ab";

    fn setup() -> (TempDir, Arc<MemObjectStore>, HandlerCache<MemObjectStore>, Tenant) {
        let tmp = TempDir::new().unwrap();
        let config = GatewayConfig {
            cache_dir: tmp.path().join("cache"),
            ..GatewayConfig::default()
        };
        let store = Arc::new(MemObjectStore::new());
        let cache = HandlerCache::new(store.clone(), Arc::new(config));
        (tmp, store, cache, Tenant::from_account(ACCOUNT).unwrap())
    }

    #[tokio::test]
    async fn resolves_handlers_and_dependencies_in_order() {
        let (_tmp, store, cache, tenant) = setup();
        store.insert(
            ACCOUNT,
            "handler",
            "a.mc",
            "code-a",
            [(MAIN_HEADER, "a"), (DEPENDENCY_HEADER, "libx.so, liby.so")],
        );
        store.insert(ACCOUNT, "handler", "b.mc", "code-b", [(MAIN_HEADER, "b")]);
        store.insert(ACCOUNT, "dependency", "libx.so", "x", []);
        store.insert(ACCOUNT, "dependency", "liby.so", "y", []);

        let resolution = cache
            .resolve(&tenant, &HandlerList::parse("a.mc,b.mc"))
            .await
            .unwrap();
        let names: Vec<_> = resolution.handlers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["a.mc", "b.mc"]);
        assert_eq!(resolution.handlers[0].dependencies, ["libx.so", "liby.so"]);
        assert!(resolution.handlers[1].dependencies.is_empty());
        let objects: Vec<_> = resolution.mirrors.iter().map(|m| m.object.as_str()).collect();
        assert_eq!(objects, ["a.mc", "b.mc", "libx.so", "liby.so"]);
        assert_eq!(store.get_count(), 0);
    }

    #[tokio::test]
    async fn missing_dependency_is_not_found() {
        let (_tmp, store, cache, tenant) = setup();
        store.insert(
            ACCOUNT,
            "handler",
            "a.mc",
            "code",
            [(MAIN_HEADER, "a"), (DEPENDENCY_HEADER, "gone.so")],
        );
        let err = cache
            .resolve(&tenant, &HandlerList::parse("a.mc"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::NotFound {
                kind: MissingKind::Dependency,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn handler_without_main_is_invalid() {
        let (_tmp, store, cache, tenant) = setup();
        store.insert(ACCOUNT, "handler", "a.mc", "code", []);
        let err = cache
            .resolve(&tenant, &HandlerList::parse("a.mc"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidHandler { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn mirror_writes_under_scope_and_reuses_verified_copy() {
        let (tmp, store, cache, tenant) = setup();
        store.insert(ACCOUNT, "handler", "a.mc", "code-a", [(MAIN_HEADER, "a")]);
        let resolution = cache
            .resolve(&tenant, &HandlerList::parse("a.mc"))
            .await
            .unwrap();

        cache.mirror_all(&tenant, &resolution.mirrors).await.unwrap();
        let path = tmp.path().join("cache/bd34c4073b654/a/a.mc");
        assert_eq!(fs::read(&path).unwrap(), b"code-a");
        assert_eq!(store.get_count(), 1);

        cache.mirror_all(&tenant, &resolution.mirrors).await.unwrap();
        assert_eq!(store.get_count(), 1);

        // Local tampering invalidates the stamp.
        fs::write(&path, b"edited").unwrap();
        cache.mirror_all(&tenant, &resolution.mirrors).await.unwrap();
        assert_eq!(store.get_count(), 2);
        assert_eq!(fs::read(&path).unwrap(), b"code-a");
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let (_tmp, _store, cache, tenant) = setup();
        let err = cache
            .verify_access(&tenant, MissingKind::Handler, "handler", "../etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }
}
