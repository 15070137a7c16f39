//! HTTP client for the upstream task source.
//!
//! Every request carries the configured credential as a bearer token and is
//! bounded by the client-wide timeout.

use crate::source::{TaskSource, UpstreamError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;
use wv_core::upstream::{
    value_as_id, UpstreamMember, UpstreamSpace, UpstreamSpaceList, UpstreamTask,
    UpstreamTaskPage, UpstreamWorkspaceList,
};

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.clickup.com/api/v2";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            token: String::new(),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

pub struct HttpTaskSource {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpTaskSource {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|err| UpstreamError::Transport(format!("invalid base url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(UpstreamError::Transport(format!(
                "base url cannot carry a path: {}",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        debug!(event = "upstream_request", path = %url.path());
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(request_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }

        resp.json::<T>()
            .await
            .map_err(|err| UpstreamError::Decode(err.to_string()))
    }
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn list_spaces(&self, org_id: &str) -> Result<Vec<UpstreamSpace>, UpstreamError> {
        let list: UpstreamSpaceList = self
            .get_json(
                self.endpoint(&["team", org_id, "space"]),
                &[("archived", "false".to_string())],
            )
            .await?;
        Ok(list.spaces)
    }

    async fn list_members(&self, org_id: &str) -> Result<Vec<UpstreamMember>, UpstreamError> {
        let roster: UpstreamWorkspaceList = self.get_json(self.endpoint(&["team"]), &[]).await?;
        roster
            .teams
            .into_iter()
            .find(|workspace| workspace.id.as_ref().and_then(value_as_id).as_deref() == Some(org_id))
            .map(|workspace| workspace.members)
            .ok_or_else(|| UpstreamError::UnknownWorkspace(org_id.to_string()))
    }

    async fn list_tasks(
        &self,
        org_id: &str,
        page: u32,
    ) -> Result<Vec<UpstreamTask>, UpstreamError> {
        let page: UpstreamTaskPage = self
            .get_json(
                self.endpoint(&["team", org_id, "task"]),
                &[
                    ("page", page.to_string()),
                    ("include_closed", "true".to_string()),
                    ("subtasks", "true".to_string()),
                ],
            )
            .await?;
        Ok(page.tasks)
    }
}

fn request_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(err.to_string())
    } else {
        UpstreamError::Transport(err.to_string())
    }
}
