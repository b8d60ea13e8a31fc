use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use url::Url;

use crate::correlator::Correlation;
use crate::error::ConfigError;
use crate::model::{TriggerParams, TriggerRequest};

pub const DEFAULT_TOKEN_PARAM: &str = "UNIQUE_GITHUB_RUN_ID";
pub const DEFAULT_SUB_KEY_PARAMS: [&str; 2] = ["SERVICE", "ENV"];

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub api_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CorrelationStrategy {
    /// Follow the queue handle returned by the trigger call.
    QueueBased,
    /// Scan the latest execution of `<job>/<sub key>` for a token echoed into
    /// its description.
    MarkerBased {
        token_param: String,
        sub_key_params: Vec<String>,
    },
}

impl Default for CorrelationStrategy {
    fn default() -> Self {
        CorrelationStrategy::MarkerBased {
            token_param: DEFAULT_TOKEN_PARAM.to_string(),
            sub_key_params: DEFAULT_SUB_KEY_PARAMS
                .iter()
                .map(|key| key.to_string())
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub url: String,
    pub job_name: String,
    pub auth: Option<Credentials>,
    pub cookies: BTreeMap<String, String>,
    pub strategy: CorrelationStrategy,
    pub params: TriggerParams,
    pub wait: bool,
    pub start_timeout: Duration,
    pub timeout: Duration,
    pub interval: Duration,
    pub correlation_interval: Duration,
    pub retry: RetryPolicy,
}

impl RunConfig {
    pub fn new(url: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            job_name: job_name.into(),
            auth: None,
            cookies: BTreeMap::new(),
            strategy: CorrelationStrategy::default(),
            params: TriggerParams::new(),
            wait: false,
            start_timeout: Duration::from_secs(600),
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(5),
            correlation_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plan().map(|_| ())
    }

    /// Checks every setting the chosen strategy depends on and resolves the
    /// trigger request plus its correlation target.
    pub fn plan(&self) -> Result<RunPlan, ConfigError> {
        let url = Url::parse(self.url.trim()).map_err(|e| ConfigError::Invalid {
            key: "url".into(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "url".into(),
                message: format!("unsupported scheme `{}`", url.scheme()),
            });
        }
        let job_name = self.job_name.trim().trim_matches('/');
        if job_name.is_empty() {
            return Err(ConfigError::Missing("job_name".into()));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "interval".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.correlation_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "correlation_interval".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }

        let correlation = match &self.strategy {
            CorrelationStrategy::QueueBased => Correlation::Queue,
            CorrelationStrategy::MarkerBased {
                token_param,
                sub_key_params,
            } => {
                let token = self.required_param(token_param)?;
                if sub_key_params.is_empty() {
                    return Err(ConfigError::Missing("sub_key_params".into()));
                }
                let sub_key = sub_key_params
                    .iter()
                    .map(|key| self.required_param(key))
                    .collect::<Result<Vec<_>, _>>()?
                    .join("-");
                Correlation::Marker {
                    token_param: token_param.clone(),
                    token,
                    sub_key,
                }
            }
        };

        let token = match &correlation {
            Correlation::Marker { token, .. } => Some(token.clone()),
            Correlation::Queue => None,
        };
        Ok(RunPlan {
            request: TriggerRequest::new(job_name, self.params.clone(), token),
            correlation,
        })
    }

    fn required_param(&self, key: &str) -> Result<String, ConfigError> {
        self.params
            .get(key)
            .map(|value| value.to_string())
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingParam(key.to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct RunPlan {
    pub request: TriggerRequest,
    pub correlation: Correlation,
}
