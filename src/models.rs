use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, Step, TripoSrError};

/// Resolutions above this are accepted but expensive on the service side.
pub const COSTLY_MC_RESOLUTION: u32 = 512;

/// Parameters of one reconstruction job.
///
/// Built with [`JobRequest::new`] and the consuming setters; the fields cannot
/// be changed afterwards. Serializes to the queue's JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    image_url: String,
    output_format: String,
    do_remove_background: bool,
    foreground_ratio: f64,
    mc_resolution: u32,
}

impl JobRequest {
    /// A request for `image_url` with the service defaults: GLB output,
    /// background removal on, foreground ratio 0.9, resolution 256.
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            output_format: "glb".to_string(),
            do_remove_background: true,
            foreground_ratio: 0.9,
            mc_resolution: 256,
        }
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    pub fn remove_background(mut self, remove: bool) -> Self {
        self.do_remove_background = remove;
        self
    }

    /// Share of the frame the foreground object should fill, in `[0.0, 1.0]`.
    pub fn foreground_ratio(mut self, ratio: f64) -> Self {
        self.foreground_ratio = ratio;
        self
    }

    /// Marching-cubes grid resolution. 32..=1024 is the useful range.
    pub fn mc_resolution(mut self, resolution: u32) -> Self {
        self.mc_resolution = resolution;
        self
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    pub fn format(&self) -> &str {
        &self.output_format
    }

    pub fn removes_background(&self) -> bool {
        self.do_remove_background
    }

    pub fn ratio(&self) -> f64 {
        self.foreground_ratio
    }

    /// The foreground ratio at the one-decimal precision the service honours.
    pub fn foreground_ratio_rounded(&self) -> f64 {
        (self.foreground_ratio * 10.0).round() / 10.0
    }

    pub fn resolution(&self) -> u32 {
        self.mc_resolution
    }

    pub fn is_costly(&self) -> bool {
        self.mc_resolution > COSTLY_MC_RESOLUTION
    }

    /// Reject values the service cannot accept.
    pub fn validate(&self) -> Result<()> {
        if self.image_url.trim().is_empty() {
            return Err(TripoSrError::InvalidRequest("image_url is empty".into()));
        }
        if !self.foreground_ratio.is_finite() || !(0.0..=1.0).contains(&self.foreground_ratio) {
            return Err(TripoSrError::InvalidRequest(format!(
                "foreground_ratio {} is outside [0.0, 1.0]",
                self.foreground_ratio
            )));
        }
        if self.mc_resolution == 0 {
            return Err(TripoSrError::InvalidRequest(
                "mc_resolution must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Identifies a queued job and where to look for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub request_id: String,
    pub status_url: String,
    pub response_url: String,
}

/// A status token as reported by the queue.
///
/// Only [`JobStatus::COMPLETED`] is terminal; every other value means the job
/// is still pending unless the caller opts into failure tokens via
/// [`RunOptions::failure_statuses`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobStatus(String);

impl JobStatus {
    pub const IN_QUEUE: &'static str = "IN_QUEUE";
    pub const IN_PROGRESS: &'static str = "IN_PROGRESS";
    pub const COMPLETED: &'static str = "COMPLETED";

    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_completed(&self) -> bool {
        self.0 == Self::COMPLETED
    }

    /// Whether this is part of the queue's documented vocabulary.
    pub fn is_known(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::IN_QUEUE | Self::IN_PROGRESS | Self::COMPLETED
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One answer from the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub response_url: Option<String>,
    pub queue_position: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Timings {
    /// Seconds.
    pub inference_time: f64,
    /// Seconds.
    pub total_time: f64,
}

/// Returned by `run` once the job completes. The artifact itself is only
/// referenced by `url`.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub url: String,
    /// e.g. "glb".
    pub format: String,
    pub file_name: String,
    /// Bytes, when reported.
    pub file_size: Option<u64>,
    pub timings: Option<Timings>,
    /// Full API response JSON.
    pub raw: serde_json::Value,
}

impl JobResult {
    /// A file name safe to write into the current directory: the final
    /// component of `file_name`, or `model.<format>` when there is none.
    pub fn local_file_name(&self) -> String {
        Path::new(&self.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                let ext = if self.format.is_empty() { "glb" } else { self.format.as_str() };
                format!("model.{ext}")
            })
    }
}

/// Where a run is in its lifecycle. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Submitting,
    Polling,
    Fetching,
    Done,
    Failed(Step),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }
}

/// Progress notifications delivered to [`RunOptions::on_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    StateChanged(RunState),
    StatusChecked {
        attempt: u32,
        status: JobStatus,
        queue_position: Option<u32>,
    },
}

/// Polling and cancellation config for `run` / `poll_until_done`.
pub struct RunOptions {
    /// Default: 5s.
    pub poll_interval: Duration,
    /// Overall deadline for the run. Default: none, poll indefinitely.
    pub timeout: Option<Duration>,
    /// Cap on status checks. Default: none.
    pub max_attempts: Option<u32>,
    /// Status tokens to treat as terminal failure. Default: empty.
    pub failure_statuses: Vec<String>,
    /// Warn after this many consecutive polls report the same status. Default: 12.
    pub stale_after: u32,
    /// Aborts the run at its next suspension point when cancelled.
    pub cancel: Option<CancellationToken>,
    /// Called on every state transition and status check.
    #[allow(clippy::type_complexity)]
    pub on_event: Option<Box<dyn Fn(&RunEvent) + Send + Sync>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: None,
            max_attempts: None,
            failure_statuses: Vec::new(),
            stale_after: 12,
            cancel: None,
            on_event: None,
        }
    }
}

impl RunOptions {
    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(ref cb) = self.on_event {
            cb(&event);
        }
    }

    pub(crate) fn is_failure(&self, status: &JobStatus) -> bool {
        self.failure_statuses.iter().any(|s| s == status.as_str())
    }
}

// ---------------------------------------------------------------------------
// Wire payloads. Every field is optional here; required ones are checked when
// converting into the public types so a missing field is a MalformedResponse
// rather than a generic decode error.
// ---------------------------------------------------------------------------

/// POST <queue> response.
#[derive(Deserialize)]
struct QueueResponse {
    request_id: Option<String>,
    response_url: Option<String>,
    status_url: Option<String>,
}

/// GET <queue>/requests/{id}/status response.
#[derive(Deserialize)]
struct StatusResponse {
    status: Option<String>,
    response_url: Option<String>,
    queue_position: Option<u32>,
}

/// GET <response_url> response.
#[derive(Deserialize)]
struct ResultResponse {
    model_mesh: Option<ModelMesh>,
    /// Decoded separately; incomplete timings are dropped, not fatal.
    timings: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ModelMesh {
    url: Option<String>,
    format: Option<String>,
    file_name: Option<String>,
    file_size: Option<u64>,
}

/// POST <upload> response.
#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(step: Step, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| TripoSrError::malformed(step, e.to_string()))
}

/// Present and non-blank, or a MalformedResponse naming `field`.
fn required(step: Step, field: &str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TripoSrError::malformed(step, format!("missing {field}")))
}

pub(crate) fn handle_from_body(body: &[u8], queue_url: &str) -> Result<JobHandle> {
    let resp: QueueResponse = decode(Step::Submit, body)?;
    let request_id = required(Step::Submit, "request_id", resp.request_id)?;

    let base = format!("{queue_url}/requests/{request_id}");
    let status_url = resp
        .status_url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| format!("{base}/status"));
    let response_url = resp.response_url.filter(|u| !u.is_empty()).unwrap_or(base);

    Ok(JobHandle {
        request_id,
        status_url,
        response_url,
    })
}

pub(crate) fn status_from_body(body: &[u8]) -> Result<StatusReport> {
    let resp: StatusResponse = decode(Step::Poll, body)?;
    let status = required(Step::Poll, "status", resp.status)?;

    Ok(StatusReport {
        status: JobStatus::new(status),
        response_url: resp.response_url.filter(|u| !u.trim().is_empty()),
        queue_position: resp.queue_position,
    })
}

pub(crate) fn result_from_body(body: &[u8]) -> Result<JobResult> {
    let raw: serde_json::Value = decode(Step::Fetch, body)?;
    let resp: ResultResponse = serde_json::from_value(raw.clone())
        .map_err(|e| TripoSrError::malformed(Step::Fetch, e.to_string()))?;

    let mesh = resp
        .model_mesh
        .ok_or_else(|| TripoSrError::malformed(Step::Fetch, "missing model_mesh"))?;
    let url = required(Step::Fetch, "model_mesh.url", mesh.url)?;

    // Fall back to the last path segment of the artifact URL.
    let file_name = mesh.file_name.filter(|n| !n.is_empty()).unwrap_or_else(|| {
        url.split(|c| c == '?' || c == '#')
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string()
    });
    let timings = resp
        .timings
        .and_then(|t| serde_json::from_value::<Timings>(t).ok());

    Ok(JobResult {
        format: mesh.format.unwrap_or_default(),
        file_name,
        file_size: mesh.file_size,
        timings,
        url,
        raw,
    })
}

pub(crate) fn upload_url_from_body(body: &[u8]) -> Result<String> {
    let resp: UploadResponse = decode(Step::Upload, body)?;
    required(Step::Upload, "url", resp.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_service_defaults() {
        let req = JobRequest::new("https://x/a.png");
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "image_url": "https://x/a.png",
                "output_format": "glb",
                "do_remove_background": true,
                "foreground_ratio": 0.9,
                "mc_resolution": 256,
            })
        );
    }

    #[test]
    fn request_validation() {
        assert!(JobRequest::new("https://x/a.png").validate().is_ok());
        assert!(JobRequest::new("  ").validate().is_err());
        assert!(JobRequest::new("u").foreground_ratio(1.2).validate().is_err());
        assert!(JobRequest::new("u").foreground_ratio(f64::NAN).validate().is_err());
        assert!(JobRequest::new("u").mc_resolution(0).validate().is_err());

        let big = JobRequest::new("u").mc_resolution(1024);
        assert!(big.validate().is_ok());
        assert!(big.is_costly());
    }

    #[test]
    fn ratio_rounds_to_one_decimal() {
        let req = JobRequest::new("u").foreground_ratio(0.86);
        assert_eq!(req.foreground_ratio_rounded(), 0.9);
        assert_eq!(req.ratio(), 0.86);
    }

    #[test]
    fn handle_requires_request_id() {
        let err = handle_from_body(br#"{"status_url":"https://q/s"}"#, "https://q").unwrap_err();
        assert!(matches!(
            err,
            TripoSrError::MalformedResponse { step: Step::Submit, .. }
        ));
    }

    #[test]
    fn handle_derives_missing_urls() {
        let handle = handle_from_body(br#"{"request_id":"r1"}"#, "https://q/app").unwrap();
        assert_eq!(handle.status_url, "https://q/app/requests/r1/status");
        assert_eq!(handle.response_url, "https://q/app/requests/r1");
    }

    #[test]
    fn status_requires_status_field() {
        assert!(status_from_body(br#"{"response_url":"u"}"#).is_err());
        assert!(status_from_body(b"not json").is_err());

        let report = status_from_body(br#"{"status":"IN_QUEUE","queue_position":3}"#).unwrap();
        assert!(!report.status.is_completed());
        assert!(report.status.is_known());
        assert_eq!(report.queue_position, Some(3));
        assert_eq!(report.response_url, None);
    }

    #[test]
    fn result_requires_nested_url() {
        let err = result_from_body(br#"{"model_mesh":{"format":"glb"}}"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed fetch response: missing model_mesh.url"
        );
        assert!(result_from_body(br#"{"timings":{"inference_time":1.0,"total_time":2.0}}"#).is_err());
    }

    #[test]
    fn result_parses_full_payload() {
        let body = json!({
            "model_mesh": {
                "url": "https://cdn/m.glb",
                "format": "glb",
                "file_name": "m.glb",
                "file_size": 12345
            },
            "timings": { "inference_time": 1.2, "total_time": 3.4 }
        });
        let result = result_from_body(body.to_string().as_bytes()).unwrap();
        assert_eq!(result.url, "https://cdn/m.glb");
        assert_eq!(result.file_size, Some(12345));
        assert_eq!(result.timings.unwrap().total_time, 3.4);
    }

    #[test]
    fn result_file_name_falls_back_to_url() {
        let result =
            result_from_body(br#"{"model_mesh":{"url":"https://cdn/a/b.glb?sig=1"}}"#).unwrap();
        assert_eq!(result.file_name, "b.glb");
        assert_eq!(result.timings, None);

        let result =
            result_from_body(br#"{"model_mesh":{"url":"https://cdn/m.glb?p=a/b#frag/x"}}"#)
                .unwrap();
        assert_eq!(result.file_name, "m.glb");
    }

    #[test]
    fn local_file_name_stays_in_the_working_directory() {
        let named = |file_name: &str, format: &str| JobResult {
            url: "https://cdn/m.glb".into(),
            format: format.into(),
            file_name: file_name.into(),
            file_size: None,
            timings: None,
            raw: serde_json::Value::Null,
        };

        assert_eq!(named("m.glb", "glb").local_file_name(), "m.glb");
        assert_eq!(named("../../etc/x.glb", "glb").local_file_name(), "x.glb");
        assert_eq!(named("/abs/y.obj", "obj").local_file_name(), "y.obj");
        assert_eq!(named("", "glb").local_file_name(), "model.glb");
        assert_eq!(named("..", "").local_file_name(), "model.glb");
        assert_eq!(named("", "obj").local_file_name(), "model.obj");
    }

    #[test]
    fn incomplete_timings_do_not_fail_the_result() {
        let partial = br#"{"model_mesh":{"url":"https://cdn/m.glb"},"timings":{"inference_time":1.2}}"#;
        let result = result_from_body(partial).unwrap();
        assert_eq!(result.url, "https://cdn/m.glb");
        assert_eq!(result.timings, None);

        let nulled = br#"{"model_mesh":{"url":"https://cdn/m.glb"},"timings":{"inference_time":null,"total_time":3.4}}"#;
        let result = result_from_body(nulled).unwrap();
        assert_eq!(result.timings, None);
        assert_eq!(result.raw["timings"]["total_time"], 3.4);
    }

    #[test]
    fn upload_requires_url() {
        assert_eq!(upload_url_from_body(br#"{"url":"https://u/1"}"#).unwrap(), "https://u/1");
        assert!(upload_url_from_body(br#"{"url":""}"#).is_err());
    }
}
