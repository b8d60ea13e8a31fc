use std::path::PathBuf;

use rbt_core::{ExecutionRef, Outcome, OutcomeKind, Reporter, Stage};
use rbt_util::output::{append_output, error_annotation, notice};
use tracing::{error, info, warn};

pub const NO_DESCRIPTION: &str = "No description available";

/// Reports to a CI runner: step outputs go to the output file, annotations to
/// stdout.
pub struct ActionsReporter {
    output_path: Option<PathBuf>,
    annotate: bool,
}

impl ActionsReporter {
    pub fn new(output_path: Option<PathBuf>, annotate: bool) -> Self {
        Self {
            output_path,
            annotate,
        }
    }

    fn emit(&self, key: &str, value: &str) {
        if let Some(path) = &self.output_path {
            if let Err(err) = append_output(path, key, value) {
                warn!("failed to write {key} to {}: {err}", path.display());
            }
        }
    }
}

impl Reporter for ActionsReporter {
    fn execution_identified(&self, execution: &ExecutionRef) {
        info!("Build URL: {}", execution.url());
        self.emit("build_url", execution.url());
        if self.annotate {
            notice("build_url", execution.url());
        }
    }

    fn progress(&self, _stage: Stage, message: &str) {
        info!("{message}");
    }

    fn finished(&self, outcome: &Outcome) {
        if outcome.execution.is_some() {
            let description = outcome
                .description
                .as_deref()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or(NO_DESCRIPTION);
            info!("Build Description: {description}");
            self.emit("build_description", description);
            if self.annotate {
                notice("build_description", description);
            }
        }
        self.emit("build_result", outcome.label());

        match &outcome.kind {
            OutcomeKind::Succeeded => info!("Build successful."),
            OutcomeKind::StartedNotWaited => {}
            OutcomeKind::Failed(err) => {
                error!(kind = err.kind(), "{err}");
                if self.annotate {
                    error_annotation(&err.to_string());
                }
            }
        }
    }
}
