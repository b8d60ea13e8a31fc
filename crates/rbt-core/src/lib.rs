//! Triggers a job on a remote build server, identifies the execution it
//! produced and optionally waits for that execution to finish.

mod cancel;
pub mod config;
pub mod correlator;
pub mod error;
pub mod jenkins;
pub mod lifecycle;
pub mod model;
pub mod poller;
pub mod remote;
#[cfg(test)]
mod testing;
pub mod transport;

pub use config::{CorrelationStrategy, Credentials, RetryPolicy, RunConfig};
pub use error::{ConfigError, FlowError, RemoteError, TransportError};
pub use lifecycle::{run, Controller, Reporter, TracingReporter};
pub use model::{ExecutionRef, Outcome, OutcomeKind, ParamValue, Stage, TriggerParams};
pub use remote::BuildServer;
