//! Authenticated HTTP calls against the build server with bounded retry.
//!
//! Headers are applied by an explicit [`HeaderPolicy`]: basic auth on every
//! call, the anti-forgery header only on state-mutating calls and only once
//! one has been installed. Cookies live in a per-transport jar seeded with the
//! configured cookies, so session cookies set by the server (Jenkins binds
//! crumbs to them) are replayed on later calls.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::cancel::sleep_or_cancel;
use crate::config::{Credentials, RetryPolicy};
use crate::error::TransportError;

pub const USER_AGENT: &str = concat!("rbt/", env!("CARGO_PKG_VERSION"));

const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Debug, Default)]
pub struct HeaderPolicy {
    auth: Option<Credentials>,
    cookies: Vec<String>,
    anti_forgery: RwLock<Option<(HeaderName, HeaderValue)>>,
}

impl HeaderPolicy {
    pub fn new(
        auth: Option<Credentials>,
        cookies: &BTreeMap<String, String>,
    ) -> Result<Self, TransportError> {
        let cookies = cookies
            .iter()
            .map(|(name, value)| {
                let pair = format!("{name}={value}");
                HeaderValue::from_str(&pair)
                    .map(|_| pair)
                    .map_err(|e| TransportError::Connect(format!("invalid cookie `{name}`: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            auth,
            cookies,
            anti_forgery: RwLock::new(None),
        })
    }

    pub fn set_anti_forgery(&self, name: &str, value: &str) -> Result<(), TransportError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Connect(format!("invalid anti-forgery header: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Connect(format!("invalid anti-forgery value: {e}")))?;
        let mut guard = self
            .anti_forgery
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some((name, value));
        Ok(())
    }

    pub fn has_anti_forgery(&self) -> bool {
        self.anti_forgery
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn apply(&self, mut builder: RequestBuilder, mutating: bool) -> RequestBuilder {
        if let Some(auth) = &self.auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.api_token));
        }
        if mutating {
            let guard = self
                .anti_forgery
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some((name, value)) = guard.as_ref() {
                builder = builder.header(name.clone(), value.clone());
            }
        }
        builder
    }
}

pub struct Transport {
    client: Client,
    base: Url,
    policy: HeaderPolicy,
    retry: RetryPolicy,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Transport {
    pub fn new(
        base_url: &str,
        policy: HeaderPolicy,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let mut base = Url::parse(base_url.trim()).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let jar = Arc::new(Jar::default());
        for cookie in &policy.cookies {
            jar.add_cookie_str(cookie, &base);
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar)
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base,
            policy,
            retry,
            cancel_rx: None,
        })
    }

    pub fn with_cancel(mut self, cancel_rx: Option<watch::Receiver<bool>>) -> Self {
        self.cancel_rx = cancel_rx;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn policy(&self) -> &HeaderPolicy {
        &self.policy
    }

    /// Builds `<base>/<segments...>`, percent-encoding each segment. An empty
    /// final segment yields a trailing slash.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Absolute URLs pass through; anything else is joined onto the base.
    pub fn resolve(&self, target: &str) -> Result<Url, TransportError> {
        let parsed = match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.base.join(target),
            Err(err) => Err(err),
        };
        parsed.map_err(|e| TransportError::InvalidUrl {
            url: target.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get(&self, target: &str) -> Result<HttpResponse, TransportError> {
        self.send(Method::GET, target, None, true).await
    }

    pub async fn post(
        &self,
        target: &str,
        form: &[(String, String)],
        idempotent: bool,
    ) -> Result<HttpResponse, TransportError> {
        self.send(Method::POST, target, Some(form), idempotent).await
    }

    /// Sends one request. GETs and calls flagged `idempotent` are retried on
    /// connection errors and on [`RETRYABLE_STATUSES`].
    pub async fn send(
        &self,
        method: Method,
        target: &str,
        form: Option<&[(String, String)]>,
        idempotent: bool,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.resolve(target)?;
        let retryable = idempotent || method == Method::GET;
        let mutating = method != Method::GET && method != Method::HEAD;
        let mut attempt = 0u32;

        loop {
            let mut builder = self.client.request(method.clone(), url.clone());
            builder = self.policy.apply(builder, mutating);
            if let Some(form) = form {
                builder = builder.form(form);
            }

            debug!(%method, %url, attempt, "sending request");
            let failure = match builder.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let headers = resp.headers().clone();
                    match resp.text().await {
                        Ok(body) if status < 400 => {
                            return Ok(HttpResponse {
                                status,
                                headers,
                                body,
                            })
                        }
                        Ok(body) => {
                            let err = TransportError::Http { status, body };
                            if !RETRYABLE_STATUSES.contains(&status) {
                                return Err(err);
                            }
                            err
                        }
                        Err(e) => {
                            TransportError::Connect(format!("failed to read response body: {e}"))
                        }
                    }
                }
                Err(e) => TransportError::Connect(e.to_string()),
            };

            attempt += 1;
            if !retryable || attempt >= self.retry.max_attempts {
                return Err(failure);
            }
            let delay = self.retry.delay_for(attempt - 1);
            warn!(
                %method,
                %url,
                attempt,
                max_attempts = self.retry.max_attempts,
                "transient failure ({failure}); retrying in {delay:?}"
            );
            sleep_or_cancel(delay, self.cancel_rx.as_ref())
                .await
                .map_err(|_| TransportError::Cancelled)?;
        }
    }
}
