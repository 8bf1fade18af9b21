use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, Url};

use crate::{Headers, ObjectBody, ObjectHead, ObjectStore, StoreError, StoreResult};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Object store reached over HTTP at `<endpoint>/<account>/<container>/<object>`.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObjectStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> StoreResult<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| StoreError::InvalidEndpoint(endpoint.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::InvalidEndpoint(endpoint.to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| StoreError::Http {
                url: endpoint.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    fn object_url(&self, account: &str, container: &str, object: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            account,
            container,
            object
        )
    }

    async fn send(&self, method: Method, url: &str) -> StoreResult<Response> {
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.header(AUTH_TOKEN_HEADER, token);
        }
        request.send().await.map_err(|source| StoreError::Http {
            url: url.to_string(),
            source,
        })
    }
}

fn collect_headers(response: &Response) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    headers
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn head(&self, account: &str, container: &str, object: &str) -> StoreResult<ObjectHead> {
        let url = self.object_url(account, container, object);
        let response = self.send(Method::HEAD, &url).await?;
        let head = ObjectHead {
            status: response.status().as_u16(),
            headers: collect_headers(&response),
        };
        tracing::debug!(%url, status = head.status, "store HEAD");
        Ok(head)
    }

    async fn get(&self, account: &str, container: &str, object: &str) -> StoreResult<ObjectBody> {
        let url = self.object_url(account, container, object);
        let response = self.send(Method::GET, &url).await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response
            .bytes()
            .await
            .map_err(|source| StoreError::Http {
                url: url.clone(),
                source,
            })?
            .to_vec();
        tracing::debug!(%url, status, bytes = body.len(), "store GET");
        Ok(ObjectBody {
            status,
            headers,
            body,
        })
    }
}
