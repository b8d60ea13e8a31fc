//! Jenkins REST adapter for [`BuildServer`].

use async_trait::async_trait;
use rbt_util::now_millis;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use crate::config::RunConfig;
use crate::error::{RemoteError, TransportError};
use crate::model::{
    ExecutionDescriptor, ExecutionRef, ExecutionState, ExecutionStatus, Issued, QueueEntry,
    QueueHandle, TriggerRequest,
};
use crate::remote::BuildServer;
use crate::transport::{HeaderPolicy, Transport};

const VERSION_HEADER: &str = "X-Jenkins";
const BUILD_TREE: &str = "tree=url,number,fullDisplayName,description,result,building";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crumb {
    crumb_request_field: String,
    crumb: String,
}

#[derive(Deserialize)]
struct QueueItem {
    #[serde(default)]
    cancelled: bool,
    executable: Option<Executable>,
    why: Option<String>,
    task: Option<Task>,
}

#[derive(Deserialize)]
struct Executable {
    url: String,
    number: Option<u64>,
}

#[derive(Deserialize)]
struct Task {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    url: String,
    number: Option<u64>,
    full_display_name: Option<String>,
    description: Option<String>,
    result: Option<String>,
    #[serde(default)]
    building: bool,
}

impl BuildInfo {
    fn execution_ref(&self) -> ExecutionRef {
        let label = match (&self.full_display_name, self.number) {
            (Some(name), _) => name.clone(),
            (None, Some(number)) => format!("#{number}"),
            (None, None) => self.url.clone(),
        };
        ExecutionRef::new(self.url.clone(), label)
    }

    fn state(&self) -> ExecutionState {
        match self.result.as_deref() {
            Some("SUCCESS") => ExecutionState::Succeeded,
            Some("FAILURE") => ExecutionState::Failed,
            Some("ABORTED") => ExecutionState::Aborted,
            Some("UNSTABLE") => ExecutionState::Unstable,
            _ if self.building => ExecutionState::Running,
            _ => ExecutionState::Pending,
        }
    }
}

pub struct JenkinsServer {
    transport: Transport,
}

impl JenkinsServer {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn from_config(
        config: &RunConfig,
        cancel_rx: Option<watch::Receiver<bool>>,
    ) -> Result<Self, TransportError> {
        let policy = HeaderPolicy::new(config.auth.clone(), &config.cookies)?;
        let transport =
            Transport::new(&config.url, policy, config.retry.clone())?.with_cancel(cancel_rx);
        Ok(Self::new(transport))
    }

    /// `folder/name` addresses nested jobs as `job/folder/job/name`.
    fn job_endpoint(&self, job_name: &str, tail: &[&str]) -> Url {
        let mut segments: Vec<&str> = job_name
            .split('/')
            .filter(|segment| !segment.is_empty())
            .flat_map(|segment| ["job", segment])
            .collect();
        segments.extend_from_slice(tail);
        self.transport.endpoint(&segments)
    }

    async fn get_json<T>(&self, target: &str) -> Result<T, RemoteError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let resp = self.transport.get(target).await?;
        resp.json().map_err(|e| RemoteError::malformed(target, e))
    }
}

fn api_target(locator: &str) -> String {
    format!("{}/api/json", locator.trim_end_matches('/'))
}

/// Build number when `url` addresses a single build (`.../job/<name>/<n>/`).
fn build_number(url: &Url) -> Option<u64> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()?
        .parse()
        .ok()
}

fn is_not_found(err: &TransportError) -> bool {
    err.status() == Some(404)
}

#[async_trait]
impl BuildServer for JenkinsServer {
    async fn version(&self) -> Result<String, RemoteError> {
        let url = self.transport.endpoint(&["api", "json"]);
        let resp = self.transport.get(url.as_str()).await?;
        Ok(resp.header(VERSION_HEADER).unwrap_or("unknown").to_string())
    }

    async fn prepare_mutations(&self) -> Result<(), RemoteError> {
        let url = self.transport.endpoint(&["crumbIssuer", "api", "json"]);
        let crumb: Crumb = self.get_json(url.as_str()).await?;
        self.transport
            .policy()
            .set_anti_forgery(&crumb.crumb_request_field, &crumb.crumb)?;
        debug!(header = %crumb.crumb_request_field, "installed anti-forgery header");
        Ok(())
    }

    async fn issue_job(&self, request: &TriggerRequest) -> Result<Issued, RemoteError> {
        let form = request.form_fields();
        let action = if form.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let url = self.job_endpoint(request.job_name(), &[action]);
        let resp = self.transport.post(url.as_str(), &form, false).await?;
        let Some(location) = resp.location() else {
            return Ok(Issued::Accepted);
        };
        if location.contains("/queue/item/") {
            return Ok(Issued::Queued(QueueHandle::new(location)));
        }
        // Some setups redirect straight to the build that was started.
        let target = self.transport.resolve(location)?;
        Ok(match build_number(&target) {
            Some(number) => Issued::Started(ExecutionRef::new(
                target.as_str(),
                format!("{} #{number}", request.job_name()),
            )),
            None => Issued::Accepted,
        })
    }

    async fn queue_entry(&self, handle: &QueueHandle) -> Result<QueueEntry, RemoteError> {
        let target = api_target(handle.locator());
        let item: QueueItem = match self.get_json(&target).await {
            Ok(item) => item,
            // Jenkins drops queue items a few minutes after they leave the queue.
            Err(RemoteError::Transport(err)) if is_not_found(&err) => {
                return Ok(QueueEntry::Cancelled)
            }
            Err(err) => return Err(err),
        };

        if let Some(executable) = item.executable {
            let task = item.task.and_then(|task| task.name);
            let label = match (task, executable.number) {
                (Some(name), Some(number)) => format!("{name} #{number}"),
                (None, Some(number)) => format!("#{number}"),
                _ => executable.url.clone(),
            };
            return Ok(QueueEntry::Bound(ExecutionRef::new(executable.url, label)));
        }
        if item.cancelled {
            return Ok(QueueEntry::Cancelled);
        }
        Ok(QueueEntry::Pending { why: item.why })
    }

    async fn latest_execution(
        &self,
        job_name: &str,
        sub_key: &str,
    ) -> Result<Option<ExecutionDescriptor>, RemoteError> {
        let mut url = self.job_endpoint(job_name, &["job", sub_key, "lastBuild", "api", "json"]);
        url.set_query(Some(BUILD_TREE));
        let build: BuildInfo = match self.get_json(url.as_str()).await {
            Ok(build) => build,
            Err(RemoteError::Transport(err)) if is_not_found(&err) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(Some(ExecutionDescriptor {
            execution: build.execution_ref(),
            description: build.description,
        }))
    }

    async fn status(&self, execution: &ExecutionRef) -> Result<ExecutionStatus, RemoteError> {
        let target = format!("{}?{BUILD_TREE}", api_target(execution.url()));
        let build: BuildInfo = self.get_json(&target).await?;
        Ok(ExecutionStatus {
            state: build.state(),
            description: build.description,
            fetched_at_unix_millis: now_millis(),
        })
    }

    fn job_page(&self, job_name: &str) -> String {
        self.job_endpoint(job_name, &[""]).to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::RetryPolicy;
    use crate::model::TriggerParams;

    fn server_for(mock: &MockServer) -> JenkinsServer {
        let transport = Transport::new(
            &mock.uri(),
            HeaderPolicy::default(),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        )
        .unwrap();
        JenkinsServer::new(transport)
    }

    #[tokio::test]
    async fn version_comes_from_header() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/json"))
            .respond_with(ResponseTemplate::new(200).insert_header("X-Jenkins", "2.440.3"))
            .mount(&mock)
            .await;

        assert_eq!(server_for(&mock).version().await.unwrap(), "2.440.3");
    }

    #[tokio::test]
    async fn crumb_is_installed_and_sent_with_trigger() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "crumbRequestField": "Jenkins-Crumb",
                "crumb": "c0ffee"
            })))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/job/deploy/build"))
            .and(header("Jenkins-Crumb", "c0ffee"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock)
            .await;

        let server = server_for(&mock);
        server.prepare_mutations().await.unwrap();
        let issued = server
            .issue_job(&TriggerRequest::new("deploy", TriggerParams::new(), None))
            .await
            .unwrap();
        assert_eq!(issued, Issued::Accepted);
    }

    #[tokio::test]
    async fn parameterised_trigger_returns_queue_handle() {
        let mock = MockServer::start().await;
        let queue_url = format!("{}/queue/item/17/", mock.uri());
        Mock::given(method("POST"))
            .and(path("/job/team/job/deploy/buildWithParameters"))
            .and(body_string("ENV=prod&SERVICE=api"))
            .respond_with(ResponseTemplate::new(201).insert_header("Location", queue_url.as_str()))
            .expect(1)
            .mount(&mock)
            .await;

        let mut params = TriggerParams::new();
        params.insert("SERVICE".into(), "api".into());
        params.insert("ENV".into(), "prod".into());
        let issued = server_for(&mock)
            .issue_job(&TriggerRequest::new("team/deploy", params, None))
            .await
            .unwrap();
        assert_eq!(issued, Issued::Queued(QueueHandle::new(queue_url)));
    }

    #[tokio::test]
    async fn location_pointing_at_a_build_is_already_started() {
        let mock = MockServer::start().await;
        let build_url = format!("{}/job/deploy/42/", mock.uri());
        Mock::given(method("POST"))
            .and(path("/job/deploy/build"))
            .respond_with(ResponseTemplate::new(201).insert_header("Location", build_url.as_str()))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/job/relative/build"))
            .respond_with(ResponseTemplate::new(201).insert_header("Location", "/job/relative/7/"))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/job/page/build"))
            .respond_with(ResponseTemplate::new(201).insert_header("Location", "/job/page/"))
            .mount(&mock)
            .await;
        let server = server_for(&mock);
        let trigger = |job: &str| TriggerRequest::new(job, TriggerParams::new(), None);

        let issued = server.issue_job(&trigger("deploy")).await.unwrap();
        assert_eq!(
            issued,
            Issued::Started(ExecutionRef::new(build_url, "deploy #42"))
        );

        let issued = server.issue_job(&trigger("relative")).await.unwrap();
        assert_eq!(
            issued,
            Issued::Started(ExecutionRef::new(
                format!("{}/job/relative/7/", mock.uri()),
                "relative #7"
            ))
        );

        let issued = server.issue_job(&trigger("page")).await.unwrap();
        assert_eq!(issued, Issued::Accepted);
    }

    #[tokio::test]
    async fn crumb_travels_with_its_session_cookie() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Set-Cookie", "JSESSIONID.abc=sess1; Path=/; HttpOnly")
                    .set_body_json(json!({
                        "crumbRequestField": "Jenkins-Crumb",
                        "crumb": "c0ffee"
                    })),
            )
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/job/deploy/build"))
            .and(header("Jenkins-Crumb", "c0ffee"))
            .and(header("Cookie", "JSESSIONID.abc=sess1"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string("No valid crumb was included in the request"),
            )
            .mount(&mock)
            .await;

        let server = server_for(&mock);
        server.prepare_mutations().await.unwrap();
        let issued = server
            .issue_job(&TriggerRequest::new("deploy", TriggerParams::new(), None))
            .await
            .unwrap();
        assert_eq!(issued, Issued::Accepted);
    }

    #[tokio::test]
    async fn trigger_rejection_is_not_retried() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock)
            .await;

        let err = server_for(&mock)
            .issue_job(&TriggerRequest::new("deploy", TriggerParams::new(), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Transport(TransportError::Http { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn queue_entry_states() {
        let mock = MockServer::start().await;
        let build_url = format!("{}/job/deploy/42/", mock.uri());
        Mock::given(method("GET"))
            .and(path("/queue/item/1/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cancelled": false,
                "why": "Waiting for next available executor",
                "executable": null
            })))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/queue/item/2/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task": {"name": "deploy"},
                "executable": {"number": 42, "url": build_url}
            })))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/queue/item/3/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cancelled": true})))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/queue/item/4/api/json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock)
            .await;

        let server = server_for(&mock);
        let handle = |n: u32| QueueHandle::new(format!("{}/queue/item/{n}/", mock.uri()));

        assert_eq!(
            server.queue_entry(&handle(1)).await.unwrap(),
            QueueEntry::Pending {
                why: Some("Waiting for next available executor".into())
            }
        );
        assert_eq!(
            server.queue_entry(&handle(2)).await.unwrap(),
            QueueEntry::Bound(ExecutionRef::new(build_url.clone(), "deploy #42"))
        );
        assert_eq!(
            server.queue_entry(&handle(3)).await.unwrap(),
            QueueEntry::Cancelled
        );
        assert_eq!(
            server.queue_entry(&handle(4)).await.unwrap(),
            QueueEntry::Cancelled
        );
    }

    #[tokio::test]
    async fn latest_execution_for_sub_key() {
        let mock = MockServer::start().await;
        let build_url = format!("{}/job/deploy/job/api-prod/9/", mock.uri());
        Mock::given(method("GET"))
            .and(path("/job/deploy/job/api-prod/lastBuild/api/json"))
            .and(query_param("tree", "url,number,fullDisplayName,description,result,building"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": build_url,
                "number": 9,
                "fullDisplayName": "deploy » api-prod #9",
                "description": "run-42-1",
                "result": null,
                "building": true
            })))
            .mount(&mock)
            .await;

        let server = server_for(&mock);
        let latest = server
            .latest_execution("deploy", "api-prod")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.execution.url(), build_url);
        assert_eq!(latest.execution.label(), "deploy » api-prod #9");
        assert_eq!(latest.description.as_deref(), Some("run-42-1"));

        assert_eq!(
            server.latest_execution("deploy", "web-dev").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn status_maps_results() {
        let mock = MockServer::start().await;
        let cases = [
            (1, json!({"url": "u", "result": null, "building": false}), ExecutionState::Pending),
            (2, json!({"url": "u", "result": null, "building": true}), ExecutionState::Running),
            (3, json!({"url": "u", "result": "SUCCESS"}), ExecutionState::Succeeded),
            (4, json!({"url": "u", "result": "FAILURE"}), ExecutionState::Failed),
            (5, json!({"url": "u", "result": "ABORTED"}), ExecutionState::Aborted),
            (6, json!({"url": "u", "result": "UNSTABLE"}), ExecutionState::Unstable),
            (7, json!({"url": "u", "result": "NOT_BUILT"}), ExecutionState::Pending),
        ];
        for (number, body, _) in &cases {
            Mock::given(method("GET"))
                .and(path(format!("/job/deploy/{number}/api/json")))
                .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
                .mount(&mock)
                .await;
        }

        let server = server_for(&mock);
        for (number, _, expected) in cases {
            let execution = ExecutionRef::new(format!("{}/job/deploy/{number}/", mock.uri()), "x");
            let status = server.status(&execution).await.unwrap();
            assert_eq!(status.state, expected, "build {number}");
        }
    }

    #[tokio::test]
    async fn status_carries_description() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/deploy/3/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "u",
                "result": "FAILURE",
                "description": "build step X failed"
            })))
            .mount(&mock)
            .await;

        let execution = ExecutionRef::new(format!("{}/job/deploy/3", mock.uri()), "#3");
        let status = server_for(&mock).status(&execution).await.unwrap();
        assert_eq!(status.description.as_deref(), Some("build step X failed"));
        assert!(status.fetched_at_unix_millis > 0);
    }

    #[tokio::test]
    async fn malformed_payloads_are_reported() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&mock)
            .await;

        let execution = ExecutionRef::new(format!("{}/job/deploy/3/", mock.uri()), "#3");
        let err = server_for(&mock).status(&execution).await.unwrap_err();
        assert!(matches!(err, RemoteError::Malformed { .. }), "got: {err}");
    }

    #[test]
    fn job_page_addresses_folders() {
        let transport = Transport::new(
            "https://ci.example.com",
            HeaderPolicy::default(),
            RetryPolicy::default(),
        )
        .unwrap();
        let server = JenkinsServer::new(transport);
        assert_eq!(
            server.job_page("team/deploy"),
            "https://ci.example.com/job/team/job/deploy/"
        );
    }
}
