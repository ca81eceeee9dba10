//! HTTP client for the pull service.

use crate::error::AgentError;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub struct SplitterClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileDescriptor {
    pub id: u64,
    pub pv: String,
    pub name: String,
    pub size: Option<u64>,
    pub sha256: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaseResponse {
    pub lease_id: String,
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmResponse {
    pub confirmed: usize,
    pub rejected: usize,
}

#[derive(Debug, Deserialize)]
pub struct PullBatchResponse {
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct ScanOutputEntry {
    pub name: String,
    pub lote: String,
    pub mtime: u64,
}

#[derive(Debug, Deserialize)]
pub struct ScanResponse {
    #[serde(default)]
    pub output: Vec<ScanOutputEntry>,
}

#[derive(Debug, Serialize)]
struct LeaseBody<'a> {
    limit: usize,
    lotes: &'a [String],
    ttl_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ConfirmBody<'a> {
    lease_id: &'a str,
    ok_ids: &'a [u64],
    fail_ids: &'a [u64],
}

#[derive(Debug, Serialize)]
struct PullBatchBody<'a> {
    limit: usize,
    lotes: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    msg: String,
}

impl SplitterClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        SplitterClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn checked(response: Response) -> Result<Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let msg = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.msg)
            .unwrap_or_default();
        Err(AgentError::Server {
            status: status.as_u16(),
            msg,
        })
    }

    pub async fn lease_files(
        &self,
        limit: usize,
        lotes: &[String],
        ttl_seconds: u64,
    ) -> Result<LeaseResponse, AgentError> {
        let response = self
            .with_auth(self.client.post(self.url("/lease-files")))
            .json(&LeaseBody {
                limit,
                lotes,
                ttl_seconds,
            })
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    pub async fn confirm(
        &self,
        lease_id: &str,
        ok_ids: &[u64],
        fail_ids: &[u64],
    ) -> Result<ConfirmResponse, AgentError> {
        let response = self
            .with_auth(self.client.post(self.url("/confirm-download")))
            .json(&ConfirmBody {
                lease_id,
                ok_ids,
                fail_ids,
            })
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    pub async fn pull_batch(
        &self,
        limit: usize,
        lotes: &[String],
    ) -> Result<PullBatchResponse, AgentError> {
        let response = self
            .with_auth(self.client.post(self.url("/pull-batch")))
            .json(&PullBatchBody { limit, lotes })
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    pub async fn scan(&self) -> Result<ScanResponse, AgentError> {
        let response = self
            .with_auth(self.client.get(self.url("/scan")))
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    /// Streams a descriptor's body into `dest`, returning the bytes
    /// written. The caller owns temp naming and verification.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, AgentError> {
        let response = self
            .with_auth(self.client.get(self.url(url)))
            .send()
            .await?;
        let mut response = Self::checked(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}
