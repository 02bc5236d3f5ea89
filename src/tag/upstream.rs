//! `TagServer`: answers `GetTagList` from the blog's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::Status;
use url::Url;

use crate::rpc::status::{FAIL, GET_TAG_LIST_FAIL};
use crate::rpc::CallContext;
use crate::tag::proto::{GetTagListReply, GetTagListRequest};
use crate::tag::service::TagService;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("upstream answered {0}")]
    Status(reqwest::StatusCode),
}

/// Client of the blog backend's REST API.
#[derive(Debug, Clone)]
pub struct BlogApi {
    client: reqwest::Client,
    base_url: Url,
    default_timeout: Duration,
}

impl BlogApi {
    pub fn new(base_url: &str, default_timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: Url::parse(base_url)?,
            default_timeout,
        })
    }

    /// `GET {base}/api/v1/tags?name=..`, bounded by `timeout` or the default.
    pub async fn get_tag_list(&self, name: &str, timeout: Option<Duration>) -> Result<Bytes, UpstreamError> {
        let mut url = self.base_url.join("/api/v1/tags")?;
        url.query_pairs_mut().append_pair("name", name);

        let response = self
            .client
            .get(url)
            .timeout(timeout.unwrap_or(self.default_timeout))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status()));
        }
        Ok(response.bytes().await?)
    }
}

#[derive(Debug, Clone)]
pub struct TagServer {
    api: BlogApi,
}

impl TagServer {
    pub fn new(api: BlogApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl TagService for TagServer {
    async fn get_tag_list(
        &self,
        ctx: CallContext,
        request: GetTagListRequest,
    ) -> Result<GetTagListReply, Status> {
        if ctx.is_expired() {
            return Err(Status::deadline_exceeded("deadline exceeded"));
        }

        let body = self
            .api
            .get_tag_list(&request.name, ctx.remaining())
            .await
            .map_err(|e| {
                tracing::warn!(name = %request.name, error = %e, "Tag list request failed");
                GET_TAG_LIST_FAIL.to_status()
            })?;

        serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(error = %e, "Tag list response is not valid JSON");
            FAIL.to_status()
        })
    }
}
