use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::errors::{FailureDetail, Result, Step, TripoSrError};
use crate::models::{
    handle_from_body, result_from_body, status_from_body, upload_url_from_body, JobHandle,
    JobRequest, JobResult, RunEvent, RunOptions, RunState, StatusReport,
};
use crate::poll::{PollLoop, RunGuard};
use crate::transport::{FilePart, HttpRequest, HttpTransport, RequestBody, ReqwestTransport};

const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run/fal-ai/triposr";
const DEFAULT_UPLOAD_URL: &str = "https://api.fal.ai/v1/upload";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const API_KEY_ENV: &str = "FAL_KEY";

/// Builder for constructing a [`Client`] with custom configuration.
///
/// # Example
///
/// ```no_run
/// use triposr::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> triposr::Result<()> {
/// let client = ClientBuilder::new()
///     .api_key("fal_key_abc123")
///     .queue_url("https://queue.fal.run/fal-ai/triposr")
///     .timeout(Duration::from_secs(120))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    api_key: Option<String>,
    queue_url: String,
    upload_url: String,
    timeout: Duration,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            api_key: None,
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            transport: None,
        }
    }

    /// Set the API key sent with every request.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the queue endpoint (defaults to `https://queue.fal.run/fal-ai/triposr`).
    pub fn queue_url(mut self, url: impl Into<String>) -> Self {
        self.queue_url = url.into();
        self
    }

    /// Override the upload endpoint (defaults to `https://api.fal.ai/v1/upload`).
    pub fn upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    /// Set the per-request HTTP timeout of the default transport (defaults to 60 seconds).
    ///
    /// Ignored when a custom [`transport`](Self::transport) is supplied.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Route all requests through `transport` instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the [`Client`].
    ///
    /// If no API key was set via [`api_key`](Self::api_key), the builder will
    /// attempt to read the `FAL_KEY` environment variable.
    ///
    /// Returns [`TripoSrError::MissingCredential`] if no key is available.
    pub fn build(self) -> Result<Client> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.is_empty())
            .ok_or(TripoSrError::MissingCredential)?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(
                ReqwestTransport::new(self.timeout).map_err(TripoSrError::TransportSetup)?,
            ),
        };

        Ok(Client {
            queue_url: self.queue_url.trim_end_matches('/').to_string(),
            upload_url: self.upload_url.trim_end_matches('/').to_string(),
            api_key,
            transport,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The TripoSR queue client.
///
/// Holds no per-job state: concurrent [`run`](Self::run) calls on one client
/// (or its clones) are independent.
///
/// # Example
///
/// ```no_run
/// use triposr::{Client, JobRequest};
///
/// # async fn example() -> triposr::Result<()> {
/// let client = Client::new("fal_key_abc123");
///
/// let request = JobRequest::new("https://example.com/chair.png").mc_resolution(256);
/// let result = client.run(&request, None).await?;
/// println!("model at {}", result.url);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    queue_url: String,
    upload_url: String,
    api_key: String,
    transport: Arc<dyn HttpTransport>,
}

/// Walks a run through its states, logging and reporting each transition.
struct StateTracker<'a> {
    state: RunState,
    opts: &'a RunOptions,
}

impl<'a> StateTracker<'a> {
    fn new(opts: &'a RunOptions) -> Self {
        Self {
            state: RunState::Idle,
            opts,
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
        self.opts.emit(RunEvent::StateChanged(next));
    }

    /// The step that was in flight, for `Failed`.
    fn current_step(&self) -> Step {
        match self.state {
            RunState::Polling => Step::Poll,
            RunState::Fetching => Step::Fetch,
            RunState::Failed(step) => step,
            _ => Step::Submit,
        }
    }
}

impl Client {
    /// Create a new client with the given API key and default settings.
    ///
    /// For customization, use [`ClientBuilder`] instead.
    pub fn new(api_key: impl Into<String>) -> Self {
        let transport = ReqwestTransport::new(DEFAULT_TIMEOUT).unwrap_or_default();

        Self {
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_key: api_key.into(),
            transport: Arc::new(transport),
        }
    }

    /// Submit a job, wait for it to complete, and fetch its result.
    ///
    /// The three steps run strictly in order and the first failure ends the
    /// run; nothing is retried. Use [`RunOptions`] to change the poll
    /// interval, bound the run with a deadline, or cancel it.
    ///
    /// # Errors
    ///
    /// - [`TripoSrError::InvalidRequest`] before any network call.
    /// - [`TripoSrError::SubmissionFailed`], [`TripoSrError::PollFailed`] or
    ///   [`TripoSrError::FetchFailed`] when the matching call fails.
    /// - [`TripoSrError::MalformedResponse`] when a body lacks required fields.
    /// - [`TripoSrError::Cancelled`] / [`TripoSrError::Timeout`].
    #[tracing::instrument(skip_all, fields(image_url = %request.image_url()))]
    pub async fn run(&self, request: &JobRequest, opts: Option<RunOptions>) -> Result<JobResult> {
        let opts = opts.unwrap_or_default();
        let guard = RunGuard::new(&opts);
        self.run_guarded(request, &opts, &guard).await
    }

    /// Upload a local image and run a job on it with default parameters.
    ///
    /// The run's cancellation token and deadline also cover the upload.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn process_file(
        &self,
        path: impl AsRef<Path>,
        opts: Option<RunOptions>,
    ) -> Result<JobResult> {
        let opts = opts.unwrap_or_default();
        let guard = RunGuard::new(&opts);

        let bytes = tokio::fs::read(path.as_ref()).await?;
        let image_url = self.upload_guarded(bytes, &guard).await?;

        self.run_guarded(&JobRequest::new(image_url), &opts, &guard)
            .await
    }

    /// Enqueue a job and return its handle without waiting.
    pub async fn submit(&self, request: &JobRequest) -> Result<JobHandle> {
        self.submit_guarded(request, &RunGuard::unbounded()).await
    }

    /// Poll `handle` until it completes; returns the response URL.
    pub async fn poll_until_done(
        &self,
        handle: &JobHandle,
        opts: Option<RunOptions>,
    ) -> Result<String> {
        let opts = opts.unwrap_or_default();
        let guard = RunGuard::new(&opts);
        PollLoop {
            client: self,
            opts: &opts,
            guard: &guard,
        }
        .until_done(handle)
        .await
    }

    /// Check a job's status once, without waiting.
    pub async fn status(&self, handle: &JobHandle) -> Result<StatusReport> {
        self.check_status(handle, &RunGuard::unbounded()).await
    }

    /// Fetch the result of a completed job from its response URL.
    pub async fn fetch(&self, response_url: &str) -> Result<JobResult> {
        self.fetch_guarded(response_url, &RunGuard::unbounded())
            .await
    }

    /// Upload PNG image bytes; returns the hosted URL to use as `image_url`.
    pub async fn upload(&self, image: Vec<u8>) -> Result<String> {
        self.upload_guarded(image, &RunGuard::unbounded()).await
    }

    /// Read a local image and upload it.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<String> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        self.upload(bytes).await
    }

    /// Download the model artifact's bytes. They are returned as-is.
    #[tracing::instrument(skip_all, fields(url = %result.url))]
    pub async fn download(&self, result: &JobResult) -> Result<Vec<u8>> {
        let request = HttpRequest::get(&result.url);
        let bytes = self
            .call(Step::Download, request, &RunGuard::unbounded())
            .await?;
        debug!(bytes = bytes.len(), "model downloaded");
        Ok(bytes)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    async fn run_guarded(
        &self,
        request: &JobRequest,
        opts: &RunOptions,
        guard: &RunGuard,
    ) -> Result<JobResult> {
        let mut tracker = StateTracker::new(opts);

        let outcome = self.drive(request, opts, guard, &mut tracker).await;

        match outcome {
            Ok(result) => {
                tracker.enter(RunState::Done);
                info!(url = %result.url, file_size = ?result.file_size, "model ready");
                Ok(result)
            }
            Err(err) => {
                let step = tracker.current_step();
                tracker.enter(RunState::Failed(step));
                warn!(%step, error = %err, "run failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        request: &JobRequest,
        opts: &RunOptions,
        guard: &RunGuard,
        tracker: &mut StateTracker<'_>,
    ) -> Result<JobResult> {
        tracker.enter(RunState::Submitting);
        let handle = self.submit_guarded(request, guard).await?;

        tracker.enter(RunState::Polling);
        let response_url = PollLoop {
            client: self,
            opts,
            guard,
        }
        .until_done(&handle)
        .await?;

        tracker.enter(RunState::Fetching);
        self.fetch_guarded(&response_url, guard).await
    }

    async fn submit_guarded(&self, request: &JobRequest, guard: &RunGuard) -> Result<JobHandle> {
        request.validate()?;
        if request.is_costly() {
            warn!(
                mc_resolution = request.resolution(),
                "mesh resolution above 512 is expensive to compute"
            );
        }

        let payload = serde_json::to_value(request)
            .map_err(|e| TripoSrError::InvalidRequest(e.to_string()))?;
        let http = HttpRequest::post(&self.queue_url, RequestBody::Json(payload))
            .header(AUTHORIZATION.as_str(), self.queue_auth())
            .header(CONTENT_TYPE.as_str(), "application/json");

        let body = self.call(Step::Submit, http, guard).await?;
        let handle = handle_from_body(&body, &self.queue_url)?;

        info!(request_id = %handle.request_id, "job enqueued");
        Ok(handle)
    }

    pub(crate) async fn check_status(
        &self,
        handle: &JobHandle,
        guard: &RunGuard,
    ) -> Result<StatusReport> {
        let http =
            HttpRequest::get(&handle.status_url).header(AUTHORIZATION.as_str(), self.queue_auth());
        let body = self.call(Step::Poll, http, guard).await?;
        status_from_body(&body)
    }

    async fn fetch_guarded(&self, response_url: &str, guard: &RunGuard) -> Result<JobResult> {
        let http =
            HttpRequest::get(response_url).header(AUTHORIZATION.as_str(), self.queue_auth());
        let body = self.call(Step::Fetch, http, guard).await?;
        result_from_body(&body)
    }

    async fn upload_guarded(&self, image: Vec<u8>, guard: &RunGuard) -> Result<String> {
        let file = FilePart {
            field: "file".to_string(),
            file_name: "image.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: image,
        };
        let http = HttpRequest::post(&self.upload_url, RequestBody::Multipart(file))
            .header(AUTHORIZATION.as_str(), format!("Bearer {}", self.api_key));

        let body = self.call(Step::Upload, http, guard).await?;
        let url = upload_url_from_body(&body)?;

        info!(%url, "image uploaded");
        Ok(url)
    }

    /// Send one request and return the body of a 2xx response.
    ///
    /// Transport errors and non-success statuses become the failure variant
    /// for `step`. No retries.
    async fn call(&self, step: Step, request: HttpRequest, guard: &RunGuard) -> Result<Vec<u8>> {
        debug!(%step, method = %request.method, url = %request.url, "sending request");

        let response = guard
            .run(self.transport.send(request))
            .await?
            .map_err(|e| TripoSrError::failed(step, e.into()))?;

        if !response.is_success() {
            return Err(TripoSrError::failed(
                step,
                FailureDetail::Status {
                    status: response.status,
                    body: response.text(),
                },
            ));
        }

        Ok(response.body)
    }

    fn queue_auth(&self) -> String {
        format!("Key {}", self.api_key)
    }
}
