//! Types shared by resource API clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::Result;

/// A remote object as the API reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Remote identifier.
    pub id: String,
    /// Version token, when the API provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Attributes as stored remotely.
    #[serde(default)]
    pub state: Json,
}

/// CRUD access to remote resources, one group at a time.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Creates an object from `config`.
    async fn create(&self, group: &str, config: &Json) -> Result<RemoteObject>;

    /// Replaces the configuration of `id`.
    ///
    /// When `etag` is given the update only succeeds if the object was not
    /// modified since.
    async fn update(&self, group: &str, id: &str, etag: Option<&str>, config: &Json) -> Result<RemoteObject>;

    /// Deletes `id`. Deleting an object that no longer exists succeeds.
    async fn delete(&self, group: &str, id: &str) -> Result<()>;

    /// Reads `id`.
    async fn read(&self, group: &str, id: &str) -> Result<RemoteObject>;

    /// Number of runs currently active for `id`.
    async fn active_runs(&self, group: &str, id: &str) -> Result<u32>;
}

#[async_trait]
impl<C: ResourceClient + ?Sized> ResourceClient for Box<C> {
    async fn create(&self, group: &str, config: &Json) -> Result<RemoteObject> {
        (**self).create(group, config).await
    }

    async fn update(&self, group: &str, id: &str, etag: Option<&str>, config: &Json) -> Result<RemoteObject> {
        (**self).update(group, id, etag, config).await
    }

    async fn delete(&self, group: &str, id: &str) -> Result<()> {
        (**self).delete(group, id).await
    }

    async fn read(&self, group: &str, id: &str) -> Result<RemoteObject> {
        (**self).read(group, id).await
    }

    async fn active_runs(&self, group: &str, id: &str) -> Result<u32> {
        (**self).active_runs(group, id).await
    }
}
