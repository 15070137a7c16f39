use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use wv_core::upstream::{UpstreamMember, UpstreamSpace, UpstreamTask};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
    #[error("upstream error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
    #[error("workspace {0} is not visible to the configured credential")]
    UnknownWorkspace(String),
}

/// The third-party system of record for teams, members and tasks.
///
/// `list_tasks` pages start at 0; an empty page marks the end of the listing.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn list_spaces(&self, org_id: &str) -> Result<Vec<UpstreamSpace>, UpstreamError>;

    async fn list_members(&self, org_id: &str) -> Result<Vec<UpstreamMember>, UpstreamError>;

    async fn list_tasks(&self, org_id: &str, page: u32)
        -> Result<Vec<UpstreamTask>, UpstreamError>;
}

#[async_trait]
impl<T: TaskSource + ?Sized> TaskSource for Arc<T> {
    async fn list_spaces(&self, org_id: &str) -> Result<Vec<UpstreamSpace>, UpstreamError> {
        (**self).list_spaces(org_id).await
    }

    async fn list_members(&self, org_id: &str) -> Result<Vec<UpstreamMember>, UpstreamError> {
        (**self).list_members(org_id).await
    }

    async fn list_tasks(
        &self,
        org_id: &str,
        page: u32,
    ) -> Result<Vec<UpstreamTask>, UpstreamError> {
        (**self).list_tasks(org_id, page).await
    }
}
