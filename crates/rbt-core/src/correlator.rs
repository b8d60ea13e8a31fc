//! Resolves which concrete execution a fire-and-forget trigger produced.
//!
//! Queue resolution follows the handle returned by the trigger call. Marker
//! scanning looks only at the most recent execution of `<job>/<sub key>` on
//! each poll, so heavy concurrent triggering of the same sub key can make it
//! miss the right instance.

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::FlowError;
use crate::model::{ExecutionRef, Issued, QueueEntry, QueueHandle, Stage};
use crate::poller::{pace, Pacing};
use crate::remote::BuildServer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Correlation {
    Queue,
    Marker {
        token_param: String,
        token: String,
        sub_key: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Correlated {
    pub execution: ExecutionRef,
    /// Description seen while correlating, if the strategy fetched one.
    pub description: Option<String>,
}

pub async fn correlate<S: BuildServer + ?Sized>(
    server: &S,
    job_name: &str,
    issued: Issued,
    correlation: &Correlation,
    pacing: Pacing,
    cancel_rx: Option<&watch::Receiver<bool>>,
) -> Result<Correlated, FlowError> {
    match correlation {
        Correlation::Queue => {
            let handle = match issued {
                Issued::Started(execution) => {
                    return Ok(Correlated {
                        execution,
                        description: None,
                    })
                }
                Issued::Queued(handle) => handle,
                Issued::Accepted => {
                    return Err(FlowError::CorrelationFailed(format!(
                        "build server accepted the trigger for {job_name} \
                         but returned no queue handle"
                    )))
                }
            };
            resolve_queue(server, &handle, pacing, cancel_rx).await
        }
        Correlation::Marker {
            token_param,
            token,
            sub_key,
        } => {
            scan_for_marker(
                server,
                job_name,
                token_param,
                token,
                sub_key,
                pacing,
                cancel_rx,
            )
            .await
        }
    }
}

async fn resolve_queue<S: BuildServer + ?Sized>(
    server: &S,
    handle: &QueueHandle,
    pacing: Pacing,
    cancel_rx: Option<&watch::Receiver<bool>>,
) -> Result<Correlated, FlowError> {
    let started = Instant::now();
    info!(queue = %handle, "Waiting for queued build to start.");
    loop {
        let entry = server
            .queue_entry(handle)
            .await
            .map_err(|err| FlowError::from_remote(err, Stage::Correlation))?;
        match entry {
            QueueEntry::Bound(execution) => {
                return Ok(Correlated {
                    execution,
                    description: None,
                })
            }
            QueueEntry::Cancelled => {
                return Err(FlowError::CorrelationFailed(format!(
                    "queue item {handle} was cancelled or expired before an execution started"
                )))
            }
            QueueEntry::Pending { why } => {
                debug!(queue = %handle, why = why.as_deref().unwrap_or(""), "still queued");
            }
        }

        if !pace(started, pacing, Stage::Correlation, cancel_rx).await? {
            return Err(FlowError::CorrelationTimeout(format!(
                "queue item {handle} was not assigned an execution within {} seconds",
                pacing.budget.as_secs()
            )));
        }
    }
}

async fn scan_for_marker<S: BuildServer + ?Sized>(
    server: &S,
    job_name: &str,
    token_param: &str,
    token: &str,
    sub_key: &str,
    pacing: Pacing,
    cancel_rx: Option<&watch::Receiver<bool>>,
) -> Result<Correlated, FlowError> {
    let started = Instant::now();
    info!(%token_param, %token, %sub_key, "Waiting for job to start.");
    loop {
        let latest = server
            .latest_execution(job_name, sub_key)
            .await
            .map_err(|err| FlowError::from_remote(err, Stage::Correlation))?;
        match latest {
            Some(found) => match found.description.as_deref() {
                Some(text) if text.contains(token) => {
                    return Ok(Correlated {
                        execution: found.execution,
                        description: found.description,
                    })
                }
                Some(text) if !text.trim().is_empty() => {
                    debug!(
                        url = found.execution.url(),
                        "latest execution belongs to another trigger"
                    );
                }
                _ => {
                    debug!(
                        url = found.execution.url(),
                        "latest execution has no description yet"
                    );
                }
            },
            None => debug!(%sub_key, "no execution yet"),
        }

        if !pace(started, pacing, Stage::Correlation, cancel_rx).await? {
            return Err(FlowError::CorrelationTimeout(format!(
                "No job with {token_param}={token} was found. It was probably started, \
                 but its URL could not be identified; check the job page: {}",
                server.job_page(job_name)
            )));
        }
    }
}
