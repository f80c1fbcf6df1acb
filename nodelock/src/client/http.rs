//! HTTP implementation of [`LockService`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::LockService;
use crate::error::LockError;
use crate::types::{LockManyResponse, LockOutcome, LockedNodes, NodePatch, NodeRecord};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Lock service reached over its JSON HTTP API.
pub struct HttpLockService {
    client: Client,
    base_url: String,
}

impl HttpLockService {
    /// Create a client for the service rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LockError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn lock_many_url(&self) -> String {
        format!("{}/nodes/lock_many/", self.base_url)
    }

    fn lock_url(&self, name: &str) -> String {
        format!("{}/nodes/{}/lock/", self.base_url, name)
    }

    fn nodes_url(&self) -> String {
        format!("{}/nodes/", self.base_url)
    }

    fn node_url(&self, name: &str) -> String {
        format!("{}/nodes/{}/", self.base_url, name)
    }

    fn update_url(&self, name: &str) -> String {
        format!("{}/nodes/{}", self.base_url, name)
    }

    async fn put_lock(&self, request: &LockRequest<'_>) -> Result<LockOutcome, LockError> {
        let response = self
            .client
            .put(self.lock_url(request.name))
            .json(request)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(LockOutcome::ok());
        }
        Ok(LockOutcome::failed(failure_reason(response).await))
    }
}

#[derive(Debug, Serialize)]
struct LockManyRequest<'a> {
    locked_by: &'a str,
    count: usize,
    machine_type: &'a str,
    description: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LockRequest<'a> {
    name: &'a str,
    locked: bool,
    locked_by: &'a str,
    description: Option<&'a str>,
}

/// Entry of a lock-many response; the service echoes full records but only
/// these two fields are used.
#[derive(Debug, Deserialize)]
struct LockedNode {
    name: String,
    #[serde(deserialize_with = "Option::deserialize")]
    ssh_pub_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// `message` from a JSON error body, otherwise the numeric status.
async fn failure_reason(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    reason_from_body(&body).unwrap_or_else(|| status.as_u16().to_string())
}

fn reason_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok()?.message
}

#[async_trait]
impl LockService for HttpLockService {
    async fn lock_many(
        &self,
        count: usize,
        machine_type: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<LockManyResponse, LockError> {
        let request = LockManyRequest {
            locked_by: owner,
            count,
            machine_type,
            description,
        };

        let response = self
            .client
            .post(self.lock_many_url())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), machine_type, count, "lock_many response");

        if status == StatusCode::SERVICE_UNAVAILABLE {
            let reason = response.text().await.unwrap_or_default();
            return Ok(LockManyResponse::Unavailable { reason });
        }
        if !status.is_success() {
            return Ok(LockManyResponse::Rejected {
                status: status.as_u16(),
                reason: failure_reason(response).await,
            });
        }

        let nodes: Vec<LockedNode> = response
            .json()
            .await
            .map_err(|e| LockError::malformed("lock_many", e))?;

        Ok(LockManyResponse::Locked(
            nodes
                .into_iter()
                .map(|n| (n.name, n.ssh_pub_key.unwrap_or_default()))
                .collect::<LockedNodes>(),
        ))
    }

    async fn lock_one(
        &self,
        name: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<LockOutcome, LockError> {
        self.put_lock(&LockRequest {
            name,
            locked: true,
            locked_by: owner,
            description,
        })
        .await
    }

    async fn unlock_one(&self, name: &str, owner: &str) -> Result<LockOutcome, LockError> {
        self.put_lock(&LockRequest {
            name,
            locked: false,
            locked_by: owner,
            description: None,
        })
        .await
    }

    async fn list_nodes(
        &self,
        machine_type: Option<&str>,
    ) -> Result<Option<Vec<NodeRecord>>, LockError> {
        let mut request = self.client.get(self.nodes_url());
        if let Some(machine_type) = machine_type {
            request = request.query(&[("machine_type", machine_type)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "list nodes refused");
            return Ok(None);
        }

        let nodes = response
            .json()
            .await
            .map_err(|e| LockError::malformed("list nodes", e))?;
        Ok(Some(nodes))
    }

    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, LockError> {
        let response = self.client.get(self.node_url(name)).send().await?;
        if !response.status().is_success() {
            debug!(node = name, status = response.status().as_u16(), "get node refused");
            return Ok(None);
        }

        let node = response
            .json()
            .await
            .map_err(|e| LockError::malformed("get node", e))?;
        Ok(Some(node))
    }

    async fn update_node(&self, name: &str, patch: &NodePatch) -> Result<bool, LockError> {
        if patch.is_empty() {
            return Ok(true);
        }

        let response = self
            .client
            .put(self.update_url(name))
            .json(patch)
            .send()
            .await?;

        let ok = response.status().is_success();
        if !ok {
            debug!(node = name, status = response.status().as_u16(), "update refused");
        }
        Ok(ok)
    }
}
