use crate::{Headers, ObjectBody, ObjectHead, ObjectStore, StoreResult};
use async_trait::async_trait;
use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

type ObjectKey = (String, String, String);

#[derive(Clone)]
struct StoredObject {
    headers: Headers,
    body: Vec<u8>,
}

/// In-memory object store. Counts calls so callers can assert which requests were made.
#[derive(Clone, Default)]
pub struct MemObjectStore {
    objects: Arc<RwLock<HashMap<ObjectKey, StoredObject>>>,
    heads: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MemObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemObjectStore")
            .field("objects", &self.objects.read().unwrap().len())
            .field("heads", &self.head_count())
            .field("gets", &self.get_count())
            .finish()
    }
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object with the given metadata headers. An `etag` derived from the body is
    /// added unless one is supplied.
    pub fn insert<'a>(
        &self,
        account: &str,
        container: &str,
        object: &str,
        body: impl Into<Vec<u8>>,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        let body = body.into();
        let mut headers: Headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        headers
            .entry("etag".into())
            .or_insert_with(|| body_etag(&body));
        headers.insert("content-length".into(), body.len().to_string());
        let key = (account.into(), container.into(), object.into());
        self.objects
            .write()
            .unwrap()
            .insert(key, StoredObject { headers, body });
    }

    pub fn remove(&self, account: &str, container: &str, object: &str) -> bool {
        let key = (account.into(), container.into(), object.into());
        self.objects.write().unwrap().remove(&key).is_some()
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn lookup(&self, account: &str, container: &str, object: &str) -> Option<StoredObject> {
        let key = (account.into(), container.into(), object.into());
        self.objects.read().unwrap().get(&key).cloned()
    }
}

fn body_etag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn head(&self, account: &str, container: &str, object: &str) -> StoreResult<ObjectHead> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        Ok(match self.lookup(account, container, object) {
            Some(found) => ObjectHead {
                status: 200,
                headers: found.headers,
            },
            None => ObjectHead {
                status: 404,
                headers: Headers::new(),
            },
        })
    }

    async fn get(&self, account: &str, container: &str, object: &str) -> StoreResult<ObjectBody> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(match self.lookup(account, container, object) {
            Some(found) => ObjectBody {
                status: 200,
                headers: found.headers,
                body: found.body,
            },
            None => ObjectBody {
                status: 404,
                headers: Headers::new(),
                body: Vec::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_and_get_report_status() {
        let store = MemObjectStore::new();
        store.insert(
            "AUTH_test",
            "handler",
            "resize.mc",
            b"bytes".to_vec(),
            [("X-Object-Meta-Handler-Main", "com.example.Resize")],
        );

        let head = store.head("AUTH_test", "handler", "resize.mc").await.unwrap();
        assert!(head.is_success());
        assert_eq!(
            head.header("x-object-meta-handler-main"),
            Some("com.example.Resize")
        );
        assert!(head.etag().is_some());

        let missing = store.head("AUTH_test", "handler", "absent.mc").await.unwrap();
        assert_eq!(missing.status, 404);

        let body = store.get("AUTH_test", "handler", "resize.mc").await.unwrap();
        assert_eq!(body.body, b"bytes");
        assert_eq!(store.head_count(), 2);
        assert_eq!(store.get_count(), 1);
    }
}
