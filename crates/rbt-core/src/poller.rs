use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cancel::sleep_or_cancel;
use crate::error::FlowError;
use crate::model::{ExecutionRef, ExecutionState, ExecutionStatus, Stage};
use crate::remote::BuildServer;

/// Wall-clock budget of one polling stage and the pause between fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    pub budget: Duration,
    pub interval: Duration,
}

/// Sleeps one interval, capped to what is left of the budget measured from
/// `started`. Returns `false` once the budget is spent.
pub(crate) async fn pace(
    started: Instant,
    pacing: Pacing,
    stage: Stage,
    cancel_rx: Option<&watch::Receiver<bool>>,
) -> Result<bool, FlowError> {
    let elapsed = started.elapsed();
    if elapsed >= pacing.budget {
        return Ok(false);
    }
    let nap = pacing.interval.min(pacing.budget - elapsed);
    sleep_or_cancel(nap, cancel_rx)
        .await
        .map_err(|_| FlowError::Cancelled { stage })?;
    Ok(started.elapsed() < pacing.budget)
}

#[derive(Debug)]
pub struct Waited {
    pub result: Result<(), FlowError>,
    /// Latest snapshot fetched, whatever the result.
    pub last_status: Option<ExecutionStatus>,
    pub polls: u32,
}

impl Waited {
    pub fn description(&self) -> Option<&str> {
        self.last_status
            .as_ref()
            .and_then(|status| status.description.as_deref())
    }
}

/// Polls `execution` until it reaches a terminal state or the budget,
/// measured from entry, runs out.
pub async fn wait_for_completion<S: BuildServer + ?Sized>(
    server: &S,
    execution: &ExecutionRef,
    pacing: Pacing,
    cancel_rx: Option<&watch::Receiver<bool>>,
) -> Waited {
    let started = Instant::now();
    let mut last_status = None;
    let mut polls = 0u32;

    let result = loop {
        match pace(started, pacing, Stage::Wait, cancel_rx).await {
            Ok(true) => {}
            Ok(false) => {
                break Err(FlowError::WaitTimedOut {
                    waited: pacing.budget,
                })
            }
            Err(err) => break Err(err),
        }

        let status = match server.status(execution).await {
            Ok(status) => status,
            Err(err) => break Err(FlowError::from_remote(err, Stage::Wait)),
        };
        polls += 1;
        let state = status.state;
        last_status = Some(status);
        debug!(url = execution.url(), %state, polls, "fetched execution status");

        if state == ExecutionState::Succeeded {
            break Ok(());
        }
        if let Some(reason) = state.failure_reason() {
            break Err(FlowError::ExecutionFailed(reason));
        }
        info!(
            "Build not finished yet ({state}). Waiting {} seconds. {}",
            pacing.interval.as_secs_f32(),
            execution.url()
        );
    };

    Waited {
        result,
        last_status,
        polls,
    }
}
