//! The sync protocol as seen by a client: fetch, store and remove a blob by
//! name. A [`FileStore`] speaks it directly; [`HttpRemote`] speaks it to a
//! `lockbox-service` instance.

use crate::error::StorageError;
use crate::store::FileStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::io;
use std::time::Duration;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<String, StorageError>;

    async fn put(
        &self,
        name: &str,
        content: &str,
        previous_name: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl BlobStore for FileStore {
    async fn get(&self, name: &str) -> Result<String, StorageError> {
        let bytes = self.read(name).await?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
    }

    async fn put(
        &self,
        name: &str,
        content: &str,
        previous_name: Option<&str>,
    ) -> Result<(), StorageError> {
        self.write(name, content.as_bytes(), previous_name).await
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        FileStore::delete(self, name).await
    }
}

#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemote {
    /// `base_url` is the service root, e.g. `https://vault.example.com`.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, StorageError> {
        let mut builder = reqwest::Client::builder().user_agent("lockbox-client/0.1");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(transport)?;
        Ok(Self {
            client,
            endpoint: format!("{}/storage", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BlobStore for HttpRemote {
    async fn get(&self, name: &str) -> Result<String, StorageError> {
        let res = self
            .client
            .get(&self.endpoint)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(transport)?;
        let res = check(res, name)?;
        res.text().await.map_err(transport)
    }

    async fn put(
        &self,
        name: &str,
        content: &str,
        previous_name: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut query = vec![("name", name)];
        if let Some(previous) = previous_name {
            query.push(("previousName", previous));
        }
        let res = self
            .client
            .put(&self.endpoint)
            .query(&query)
            .body(content.to_owned())
            .send()
            .await
            .map_err(transport)?;
        check(res, name).map(|_| ())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let res = self
            .client
            .delete(&self.endpoint)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(transport)?;
        check(res, name).map(|_| ())
    }
}

fn check(res: reqwest::Response, name: &str) -> Result<reqwest::Response, StorageError> {
    match res.status() {
        s if s.is_success() => Ok(res),
        StatusCode::NOT_FOUND => Err(StorageError::NotFound(name.to_string())),
        StatusCode::BAD_REQUEST => Err(StorageError::InvalidName(name.to_string())),
        StatusCode::FORBIDDEN => Err(StorageError::Forbidden(name.to_string())),
        other => Err(StorageError::Io(io::Error::other(format!(
            "remote store answered {other}"
        )))),
    }
}

fn transport(e: reqwest::Error) -> StorageError {
    StorageError::Io(io::Error::other(e))
}
