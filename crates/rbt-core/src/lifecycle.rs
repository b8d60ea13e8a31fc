use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::correlator::correlate;
use crate::error::{ConfigError, FlowError, TransportError};
use crate::jenkins::JenkinsServer;
use crate::model::{ExecutionRef, Outcome, OutcomeKind, Stage};
use crate::poller::{wait_for_completion, Pacing};
use crate::remote::BuildServer;

/// Receives caller-visible events as the flow progresses.
pub trait Reporter: Send + Sync {
    /// Called once, as soon as the execution is identified.
    fn execution_identified(&self, execution: &ExecutionRef);

    fn progress(&self, _stage: Stage, _message: &str) {}

    /// Called exactly once with the final outcome.
    fn finished(&self, outcome: &Outcome);
}

/// Logs every event through `tracing` and nothing else.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn execution_identified(&self, execution: &ExecutionRef) {
        info!("Build URL: {}", execution.url());
    }

    fn progress(&self, stage: Stage, message: &str) {
        info!(%stage, "{message}");
    }

    fn finished(&self, outcome: &Outcome) {
        match &outcome.kind {
            OutcomeKind::Failed(err) => error!(kind = err.kind(), "{err}"),
            _ => info!(outcome = outcome.label(), "finished"),
        }
    }
}

pub struct Controller<S> {
    server: S,
    reporter: Arc<dyn Reporter>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl<S: BuildServer> Controller<S> {
    pub fn new(server: S, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            server,
            reporter,
            cancel_rx: None,
        }
    }

    pub fn with_cancel(mut self, cancel_rx: Option<watch::Receiver<bool>>) -> Self {
        self.cancel_rx = cancel_rx;
        self
    }

    /// Runs trigger → correlate → optional wait and reports the outcome.
    pub async fn run(&self, config: &RunConfig) -> Outcome {
        let outcome = self.drive(config).await.unwrap_or_else(Outcome::failed);
        self.reporter.finished(&outcome);
        outcome
    }

    async fn drive(&self, config: &RunConfig) -> Result<Outcome, FlowError> {
        let plan = config.plan()?;
        let cancel_rx = self.cancel_rx.as_ref();

        let version = self
            .server
            .version()
            .await
            .map_err(|err| FlowError::from_remote(err, Stage::Connect))?;
        self.reporter.progress(
            Stage::Connect,
            &format!("Successfully connected to build server (version {version})."),
        );

        if let Err(err) = self.server.prepare_mutations().await {
            warn!("anti-forgery token unavailable, triggering without it: {err}");
        }
        let issued = self
            .server
            .issue_job(&plan.request)
            .await
            .map_err(|err| FlowError::from_remote(err, Stage::Trigger))?;
        self.reporter.progress(Stage::Trigger, "Requested to build job.");

        let correlated = correlate(
            &self.server,
            plan.request.job_name(),
            issued,
            &plan.correlation,
            Pacing {
                budget: config.start_timeout,
                interval: config.correlation_interval,
            },
            cancel_rx,
        )
        .await?;
        self.reporter.execution_identified(&correlated.execution);

        if !config.wait {
            self.reporter.progress(Stage::Wait, "Not waiting for build to finish.");
            return Ok(Outcome {
                kind: OutcomeKind::StartedNotWaited,
                execution: Some(correlated.execution),
                description: correlated.description,
            });
        }

        let waited = wait_for_completion(
            &self.server,
            &correlated.execution,
            Pacing {
                budget: config.timeout,
                interval: config.interval,
            },
            cancel_rx,
        )
        .await;
        let description = waited
            .description()
            .map(str::to_string)
            .or(correlated.description);
        let kind = match waited.result {
            Ok(()) => OutcomeKind::Succeeded,
            Err(err) => OutcomeKind::Failed(err),
        };
        Ok(Outcome {
            kind,
            execution: Some(correlated.execution),
            description,
        })
    }
}

/// Runs one invocation against a Jenkins server built from `config`.
pub async fn run(
    config: &RunConfig,
    reporter: Arc<dyn Reporter>,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> Outcome {
    match JenkinsServer::from_config(config, cancel_rx.clone()) {
        Ok(server) => {
            Controller::new(server, reporter)
                .with_cancel(cancel_rx)
                .run(config)
                .await
        }
        Err(err) => {
            let err = match err {
                TransportError::InvalidUrl { message, .. } => {
                    FlowError::Config(ConfigError::Invalid {
                        key: "url".into(),
                        message,
                    })
                }
                other => FlowError::Connect(other.to_string()),
            };
            let outcome = Outcome::failed(err);
            reporter.finished(&outcome);
            outcome
        }
    }
}
