use async_trait::async_trait;

use crate::error::RemoteError;
use crate::model::{
    ExecutionDescriptor, ExecutionRef, ExecutionStatus, Issued, QueueEntry, QueueHandle,
    TriggerRequest,
};

/// Operations the lifecycle needs from a remote build server.
#[async_trait]
pub trait BuildServer: Send + Sync {
    /// Lightweight reachability probe; returns the server version.
    async fn version(&self) -> Result<String, RemoteError>;

    /// Acquires whatever anti-forgery token state-mutating calls need.
    async fn prepare_mutations(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn issue_job(&self, request: &TriggerRequest) -> Result<Issued, RemoteError>;

    async fn queue_entry(&self, handle: &QueueHandle) -> Result<QueueEntry, RemoteError>;

    /// Most recent execution of `job_name` under `sub_key`, if any.
    async fn latest_execution(
        &self,
        job_name: &str,
        sub_key: &str,
    ) -> Result<Option<ExecutionDescriptor>, RemoteError>;

    async fn status(&self, execution: &ExecutionRef) -> Result<ExecutionStatus, RemoteError>;

    /// Human-facing listing page for a job.
    fn job_page(&self, job_name: &str) -> String;
}
