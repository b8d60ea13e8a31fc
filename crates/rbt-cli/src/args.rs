use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use rbt_core::config::{DEFAULT_SUB_KEY_PARAMS, DEFAULT_TOKEN_PARAM};
use rbt_core::{ConfigError, CorrelationStrategy, Credentials, RunConfig, TriggerParams};
use rbt_util::expand_user;
use tracing::info;

pub const DEFAULT_PARAMETERS_FILE: &str = "/app/parameters.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Scan the latest execution for the marker parameter
    Marker,
    /// Follow the queue item returned by the trigger call
    Queue,
}

#[derive(Debug, Parser)]
#[command(
    name = "rbt",
    version,
    about = "Trigger a remote build job and optionally wait for it to finish"
)]
pub struct Cli {
    /// Base URL of the build server
    #[arg(long, env = "INPUT_URL")]
    pub url: String,

    /// Job to trigger; `folder/name` addresses nested jobs
    #[arg(long, env = "INPUT_JOB_NAME")]
    pub job_name: String,

    #[arg(long, env = "INPUT_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "INPUT_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// JSON object of cookies sent with every request
    #[arg(long, env = "INPUT_COOKIES", hide_env_values = true)]
    pub cookies: Option<String>,

    /// JSON object of job parameters
    #[arg(long, env = "INPUT_PARAMETERS")]
    pub parameters: Option<String>,

    /// JSON file of job parameters; used instead of --parameters when it exists
    #[arg(long, env = "INPUT_PARAMETERS_FILE", default_value = DEFAULT_PARAMETERS_FILE)]
    pub parameters_file: String,

    /// Wait for the build to finish
    #[arg(
        long,
        env = "INPUT_WAIT",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub wait: bool,

    /// Seconds to wait for the build to finish
    #[arg(long, env = "INPUT_TIMEOUT", default_value_t = 600)]
    pub timeout: u64,

    /// Seconds to wait for the build to be identified
    #[arg(long, env = "INPUT_START_TIMEOUT", default_value_t = 600)]
    pub start_timeout: u64,

    /// Seconds between status checks
    #[arg(long, env = "INPUT_INTERVAL", default_value_t = 5)]
    pub interval: u64,

    #[arg(long, env = "INPUT_STRATEGY", value_enum, default_value_t = Strategy::Marker)]
    pub strategy: Strategy,

    /// Parameter whose value the job echoes into its description
    #[arg(long, env = "INPUT_MARKER_PARAM", default_value = DEFAULT_TOKEN_PARAM)]
    pub marker_param: String,

    /// Parameters whose values, joined with `-`, name the sub-job to scan
    #[arg(
        long,
        env = "INPUT_SUB_KEY_PARAMS",
        value_delimiter = ',',
        default_values_t = DEFAULT_SUB_KEY_PARAMS.map(String::from)
    )]
    pub sub_key_params: Vec<String>,

    #[arg(long, env = "INPUT_LOG_LEVEL", default_value = rbt_util::DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

impl Cli {
    pub fn into_config(self) -> Result<RunConfig, ConfigError> {
        let params = self.load_parameters()?;
        let cookies = match self.cookies.as_deref() {
            Some(text) if !text.trim().is_empty() => parse_cookies(text)?,
            _ => BTreeMap::new(),
        };

        let auth = match (self.username, self.api_token) {
            (Some(username), Some(api_token))
                if !username.is_empty() && !api_token.is_empty() =>
            {
                Some(Credentials {
                    username,
                    api_token,
                })
            }
            _ => {
                info!("Username or token not provided. Connecting without authentication.");
                None
            }
        };

        let strategy = match self.strategy {
            Strategy::Queue => CorrelationStrategy::QueueBased,
            Strategy::Marker => CorrelationStrategy::MarkerBased {
                token_param: self.marker_param,
                sub_key_params: self
                    .sub_key_params
                    .into_iter()
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .collect(),
            },
        };

        let mut config = RunConfig::new(self.url, self.job_name);
        config.auth = auth;
        config.cookies = cookies;
        config.strategy = strategy;
        config.params = params;
        config.wait = self.wait;
        config.timeout = Duration::from_secs(self.timeout);
        config.start_timeout = Duration::from_secs(self.start_timeout);
        config.interval = Duration::from_secs(self.interval);
        config.validate()?;
        Ok(config)
    }

    fn load_parameters(&self) -> Result<TriggerParams, ConfigError> {
        let path: PathBuf = expand_user(&self.parameters_file);
        if path.is_file() {
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Invalid {
                key: "parameters_file".into(),
                message: format!("{}: {e}", path.display()),
            })?;
            return parse_parameters(&text);
        }
        match self.parameters.as_deref() {
            Some(text) if !text.trim().is_empty() => parse_parameters(text),
            _ => Ok(TriggerParams::new()),
        }
    }
}

pub fn parse_parameters(text: &str) -> Result<TriggerParams, ConfigError> {
    serde_json::from_str(text).map_err(|e| ConfigError::Json {
        input: "parameters".into(),
        message: e.to_string(),
    })
}

/// Cookies are commonly written with single quotes in workflow files.
pub fn parse_cookies(text: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    serde_json::from_str(&text.replace('\'', "\"")).map_err(|e| ConfigError::Json {
        input: "cookies".into(),
        message: e.to_string(),
    })
}
