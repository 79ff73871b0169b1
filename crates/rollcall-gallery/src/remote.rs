//! Remote blob bucket holding the source-of-truth face images.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Objects requested per listing page.
const LIST_PAGE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote storage not configured")]
    NotConfigured,
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteObject {
    #[serde(default)]
    pub name: String,
}

impl RemoteObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
pub trait RemoteBucket: Send + Sync {
    /// Full listing of the bucket root.
    async fn list(&self) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Content of one object.
    async fn download(&self, name: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Supabase Storage bucket accessed over its REST API.
pub struct SupabaseBucket {
    client: reqwest::Client,
    base_url: String,
    key: String,
    bucket: String,
}

impl SupabaseBucket {
    pub fn new(base_url: &str, key: &str, bucket: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            bucket: bucket.to_string(),
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    async fn checked(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::Status { url: url.to_string(), status: status.as_u16(), body })
    }

    async fn list_page(&self, offset: usize) -> Result<Vec<RemoteObject>, RemoteError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let body = json!({
            "prefix": "",
            "limit": LIST_PAGE_SIZE,
            "offset": offset,
            "sortBy": { "column": "name", "order": "asc" },
        });

        let http = |source| RemoteError::Http { url: url.clone(), source };
        let resp = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(http)?;
        let resp = Self::checked(&url, resp).await?;
        resp.json::<Vec<RemoteObject>>().await.map_err(http)
    }
}

#[async_trait]
impl RemoteBucket for SupabaseBucket {
    async fn list(&self) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut objects = Vec::new();
        loop {
            let page = self.list_page(objects.len()).await?;
            let short = page.len() < LIST_PAGE_SIZE;
            objects.extend(page);
            if short {
                break;
            }
        }
        tracing::debug!(bucket = %self.bucket, count = objects.len(), "listed remote bucket");
        Ok(objects)
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, RemoteError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, name);
        let http = |source| RemoteError::Http { url: url.clone(), source };
        let resp = self.authorized(self.client.get(&url)).send().await.map_err(http)?;
        let resp = Self::checked(&url, resp).await?;
        let bytes = resp.bytes().await.map_err(http)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_entry_tolerates_extra_fields_and_null_name() {
        let raw = r#"[
            {"name": "S1-202501011200.jpg", "id": "abc", "metadata": {"size": 10}},
            {"name": ".emptyFolderPlaceholder", "id": null},
            {"id": "no-name"}
        ]"#;
        let objects: Vec<RemoteObject> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            objects,
            vec![
                RemoteObject::new("S1-202501011200.jpg"),
                RemoteObject::new(".emptyFolderPlaceholder"),
                RemoteObject::new(""),
            ]
        );
    }

    #[test]
    fn test_base_url_is_normalized() {
        let bucket = SupabaseBucket::new("https://example.supabase.co/", "k", "face-images");
        assert_eq!(bucket.base_url, "https://example.supabase.co");
    }
}
