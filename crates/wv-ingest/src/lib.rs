//! Upstream task-source access and the three-phase ingestion sync.

pub mod client;
pub mod source;
pub mod sync;

pub use client::{HttpTaskSource, UpstreamConfig};
pub use source::{TaskSource, UpstreamError};
pub use sync::{
    IngestionSync, MemberSyncReport, PartialSync, SyncConfig, SyncError, SyncPhase, SyncReport,
    TaskSyncReport, TeamSyncReport,
};
