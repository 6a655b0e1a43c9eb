//! RunPod serverless job API: take a job, post its output, and keep the
//! worker's heartbeat alive while a job runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::adapters::block_on;
use crate::adapters::job_queue::{JobPoll, JobQueue};
use crate::runtime::contract::GenerationResult;

pub const JOB_TAKE_URL_VAR: &str = "RUNPOD_WEBHOOK_GET_JOB";
pub const JOB_DONE_URL_VAR: &str = "RUNPOD_WEBHOOK_POST_OUTPUT";
pub const PING_URL_VAR: &str = "RUNPOD_WEBHOOK_PING";
pub const API_KEY_VAR: &str = "RUNPOD_AI_API_KEY";
pub const POD_ID_VAR: &str = "RUNPOD_POD_ID";
pub const PING_INTERVAL_VAR: &str = "RUNPOD_PING_INTERVAL";

const DEFAULT_PING_INTERVAL_MS: u64 = 10_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const JOB_ID_PLACEHOLDER: &str = "$ID";
const POD_ID_PLACEHOLDER: &str = "$RUNPOD_POD_ID";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("missing RunPod environment variables: {0}")]
    Missing(String),
    #[error("RUNPOD_PING_INTERVAL must be a positive number of milliseconds, got {0:?}")]
    InvalidPingInterval(String),
}

/// Job API URLs with the pod id already substituted.
#[derive(Clone, PartialEq, Eq)]
pub struct RunPodEndpoints {
    job_take_url: String,
    job_done_template: String,
    ping_url: Option<String>,
    api_key: String,
    pub ping_interval: Duration,
}

impl std::fmt::Debug for RunPodEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPodEndpoints")
            .field("job_take_url", &self.job_take_url)
            .field("job_done_template", &self.job_done_template)
            .field("ping_url", &self.ping_url)
            .field("api_key", &"<redacted>")
            .field("ping_interval", &self.ping_interval)
            .finish()
    }
}

impl RunPodEndpoints {
    /// `Ok(None)` when the job-take URL is unset, meaning the worker is not
    /// running under RunPod.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, EndpointError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let Some(job_take) = read(JOB_TAKE_URL_VAR) else {
            return Ok(None);
        };
        let job_done = read(JOB_DONE_URL_VAR);
        let api_key = read(API_KEY_VAR);
        let pod_id = read(POD_ID_VAR);

        let missing: Vec<&str> = [
            (JOB_DONE_URL_VAR, job_done.is_none()),
            (API_KEY_VAR, api_key.is_none()),
            (POD_ID_VAR, pod_id.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();
        let (Some(job_done), Some(api_key), Some(pod_id)) = (job_done, api_key, pod_id) else {
            return Err(EndpointError::Missing(missing.join(", ")));
        };

        let ping_interval = match read(PING_INTERVAL_VAR) {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|millis| *millis > 0)
                .ok_or_else(|| EndpointError::InvalidPingInterval(raw.clone()))?,
            None => DEFAULT_PING_INTERVAL_MS,
        };

        Ok(Some(Self {
            job_take_url: job_take.replace(JOB_ID_PLACEHOLDER, &pod_id),
            job_done_template: job_done.replace(POD_ID_PLACEHOLDER, &pod_id),
            ping_url: read(PING_URL_VAR).map(|url| url.replace(POD_ID_PLACEHOLDER, &pod_id)),
            api_key,
            ping_interval: Duration::from_millis(ping_interval),
        }))
    }

    pub fn from_env() -> Result<Option<Self>, EndpointError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn job_take_url(&self) -> String {
        append_query(&self.job_take_url, "job_in_progress=0")
    }

    pub fn job_done_url(&self, job_id: &str) -> String {
        append_query(
            &self.job_done_template.replace(JOB_ID_PLACEHOLDER, job_id),
            "isStream=false",
        )
    }

    pub fn ping_url(&self) -> Option<&str> {
        self.ping_url.as_deref()
    }
}

fn append_query(url: &str, pair: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{pair}")
}

/// [`JobQueue`] over the RunPod job API.
#[derive(Debug, Clone)]
pub struct RunPodJobQueue {
    client: reqwest::Client,
    endpoints: RunPodEndpoints,
    in_progress: Arc<Mutex<Option<String>>>,
}

impl RunPodJobQueue {
    pub fn new(endpoints: RunPodEndpoints) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, endpoints))
    }

    pub fn with_client(client: reqwest::Client, endpoints: RunPodEndpoints) -> Self {
        Self {
            client,
            endpoints,
            in_progress: Arc::new(Mutex::new(None)),
        }
    }

    /// Pings RunPod every `ping_interval` with the id of the job in flight.
    /// Returns `None` when no ping URL is configured. Must be called inside a
    /// tokio runtime.
    pub fn spawn_heartbeat(&self) -> Option<tokio::task::JoinHandle<()>> {
        let ping_url = self.endpoints.ping_url()?.to_string();
        let client = self.client.clone();
        let api_key = self.endpoints.api_key.clone();
        let in_progress = Arc::clone(&self.in_progress);
        let period = self.endpoints.ping_interval;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let job_ids = in_progress
                    .lock()
                    .map(|current| current.clone().unwrap_or_default())
                    .unwrap_or_default();
                let outcome = client
                    .get(&ping_url)
                    .header(AUTHORIZATION, &api_key)
                    .query(&[("job_id", job_ids.as_str()), ("retry_ping", "0")])
                    .send()
                    .await
                    .and_then(|response| response.error_for_status());
                if let Err(error) = outcome {
                    tracing::debug!(%error, "heartbeat ping failed");
                }
            }
        }))
    }

    fn set_in_progress(&self, job_id: Option<String>) {
        if let Ok(mut current) = self.in_progress.lock() {
            *current = job_id;
        }
    }

    async fn take_job(&self) -> Result<JobPoll, String> {
        let url = self.endpoints.job_take_url();
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, &self.endpoints.api_key)
            .send()
            .await
            .map_err(|error| format!("job take request failed: {error}"))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(JobPoll::Idle);
        }
        let body = response
            .text()
            .await
            .map_err(|error| format!("failed to read job take response: {error}"))?;
        if !status.is_success() {
            return Err(format!("job take returned {status}: {body}"));
        }
        if body.trim().is_empty() {
            return Ok(JobPoll::Idle);
        }

        let job: Value = serde_json::from_str(&body)
            .map_err(|error| format!("job take returned invalid JSON: {error}"))?;
        let Some(job_id) = job.get("id").and_then(Value::as_str) else {
            return Err("job take response has no id".to_string());
        };
        self.set_in_progress(Some(job_id.to_string()));
        Ok(JobPoll::Job(job))
    }

    async fn post_result(&self, job_id: &str, result: &GenerationResult) -> Result<(), String> {
        let url = self.endpoints.job_done_url(job_id);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, &self.endpoints.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({ "output": result }))
            .send()
            .await
            .map_err(|error| format!("job done request failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("job done returned {status}: {body}"));
        }
        Ok(())
    }
}

impl JobQueue for RunPodJobQueue {
    fn next_job(&self) -> Result<JobPoll, String> {
        block_on(self.take_job())
    }

    fn complete(&self, job_id: &str, result: &GenerationResult) -> Result<(), String> {
        let outcome = block_on(self.post_result(job_id, result));
        self.set_in_progress(None);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn endpoints_for(base: &str) -> RunPodEndpoints {
        let take = format!("{base}/v2/ep/job-take/$ID?gpu=A100");
        let done = format!("{base}/v2/ep/job-done/$RUNPOD_POD_ID/$ID?gpu=A100");
        RunPodEndpoints::from_lookup(lookup(&[
            (JOB_TAKE_URL_VAR, &take),
            (JOB_DONE_URL_VAR, &done),
            (API_KEY_VAR, "rp-key"),
            (POD_ID_VAR, "pod-1"),
        ]))
        .expect("valid endpoints")
        .expect("running under RunPod")
    }

    fn queue_for(base: &str) -> RunPodJobQueue {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client");
        RunPodJobQueue::with_client(client, endpoints_for(base))
    }

    fn read_request(stream: &mut std::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let read = stream.read(&mut buf).expect("read request");
            if read == 0 {
                break;
            }
            data.extend_from_slice(&buf[..read]);
            let Some(end) = data.windows(4).position(|window| window == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
            let body_len = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + body_len {
                break;
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Answers one HTTP request with `status` and `body`; the join handle
    /// yields the raw request.
    fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = read_request(&mut stream);
            let response = if body.is_empty() {
                format!("HTTP/1.1 {status}\r\nconnection: close\r\n\r\n")
            } else {
                format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                )
            };
            stream.write_all(response.as_bytes()).expect("write response");
            request
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn endpoints_substitute_pod_and_job_ids() {
        let endpoints = endpoints_for("https://api.runpod.ai");

        assert_eq!(
            endpoints.job_take_url(),
            "https://api.runpod.ai/v2/ep/job-take/pod-1?gpu=A100&job_in_progress=0"
        );
        assert_eq!(
            endpoints.job_done_url("job-9"),
            "https://api.runpod.ai/v2/ep/job-done/pod-1/job-9?gpu=A100&isStream=false"
        );
        assert_eq!(endpoints.ping_interval, Duration::from_millis(10_000));
        assert!(!format!("{endpoints:?}").contains("rp-key"));
    }

    #[test]
    fn query_separator_is_added_when_url_has_none() {
        assert_eq!(append_query("http://h/take", "a=1"), "http://h/take?a=1");
        assert_eq!(append_query("http://h/take?x=2", "a=1"), "http://h/take?x=2&a=1");
    }

    #[test]
    fn absent_job_take_url_means_not_on_runpod() {
        assert_eq!(RunPodEndpoints::from_lookup(lookup(&[])), Ok(None));
    }

    #[test]
    fn partial_configuration_names_missing_variables() {
        let error = RunPodEndpoints::from_lookup(lookup(&[(JOB_TAKE_URL_VAR, "http://h/$ID")]))
            .expect_err("incomplete");

        assert_eq!(
            error,
            EndpointError::Missing(format!("{JOB_DONE_URL_VAR}, {API_KEY_VAR}, {POD_ID_VAR}"))
        );
    }

    #[test]
    fn ping_url_and_interval_are_read() {
        let endpoints = RunPodEndpoints::from_lookup(lookup(&[
            (JOB_TAKE_URL_VAR, "http://h/take/$ID"),
            (JOB_DONE_URL_VAR, "http://h/done/$RUNPOD_POD_ID/$ID"),
            (PING_URL_VAR, "http://h/ping/$RUNPOD_POD_ID"),
            (PING_INTERVAL_VAR, "2500"),
            (API_KEY_VAR, "rp-key"),
            (POD_ID_VAR, "pod-1"),
        ]))
        .expect("valid")
        .expect("configured");

        assert_eq!(endpoints.ping_url(), Some("http://h/ping/pod-1"));
        assert_eq!(endpoints.ping_interval, Duration::from_millis(2500));
    }

    #[test]
    fn unusable_ping_interval_is_rejected() {
        for raw in ["soon", "0"] {
            let error = RunPodEndpoints::from_lookup(lookup(&[
                (JOB_TAKE_URL_VAR, "http://h/take/$ID"),
                (JOB_DONE_URL_VAR, "http://h/done/$ID"),
                (PING_INTERVAL_VAR, raw),
                (API_KEY_VAR, "rp-key"),
                (POD_ID_VAR, "pod-1"),
            ]))
            .expect_err("invalid interval");

            assert_eq!(error, EndpointError::InvalidPingInterval(raw.to_string()));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_content_means_idle() {
        let (base, server) = respond_once("204 No Content", "");
        let queue = queue_for(&base);

        let poll = queue.next_job().expect("poll succeeds");

        assert_eq!(poll, JobPoll::Idle);
        let request = server.join().expect("server thread");
        assert!(request.starts_with("GET /v2/ep/job-take/pod-1?gpu=A100&job_in_progress=0 HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: rp-key"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn taken_job_is_returned_and_marked_in_progress() {
        let (base, server) = respond_once("200 OK", r#"{"id":"job-9","input":{"prompt":"a cat"}}"#);
        let queue = queue_for(&base);

        let poll = queue.next_job().expect("poll succeeds");

        assert_eq!(
            poll,
            JobPoll::Job(json!({"id": "job-9", "input": {"prompt": "a cat"}}))
        );
        assert_eq!(
            queue.in_progress.lock().expect("lock").as_deref(),
            Some("job-9")
        );
        server.join().expect("server thread");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_on_take_is_reported() {
        let (base, server) = respond_once("500 Internal Server Error", r#"{"error":"boom"}"#);
        let queue = queue_for(&base);

        let error = queue.next_job().expect_err("poll fails");

        assert!(error.contains("500"));
        server.join().expect("server thread");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completion_posts_output_envelope() {
        let (base, server) = respond_once("200 OK", "{}");
        let queue = queue_for(&base);
        queue.set_in_progress(Some("job-9".to_string()));

        queue
            .complete("job-9", &GenerationResult::error("inference failed with return code 1"))
            .expect("post succeeds");

        let request = server.join().expect("server thread");
        assert!(request.starts_with("POST /v2/ep/job-done/pod-1/job-9?gpu=A100&isStream=false HTTP/1.1"));
        let body = request.split("\r\n\r\n").nth(1).expect("request body");
        let posted: Value = serde_json::from_str(body).expect("json body");
        assert_eq!(
            posted,
            json!({"output": {"status": "error", "error": "inference failed with return code 1"}})
        );
        assert_eq!(queue.in_progress.lock().expect("lock").as_deref(), None);
    }
}
