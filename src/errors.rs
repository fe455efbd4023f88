use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// The remote call a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Upload,
    Submit,
    Poll,
    Fetch,
    Download,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Upload => "upload",
            Step::Submit => "submit",
            Step::Poll => "poll",
            Step::Fetch => "fetch",
            Step::Download => "download",
        };
        f.write_str(name)
    }
}

/// Why a single HTTP exchange did not succeed.
#[derive(Error, Debug)]
pub enum FailureDetail {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No usable response arrived.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// All errors that can occur while running a reconstruction job.
#[derive(Error, Debug)]
pub enum TripoSrError {
    /// Enqueueing the job failed.
    #[error("failed to enqueue request: {detail}")]
    SubmissionFailed { detail: FailureDetail },

    /// A status check failed. A single failed check aborts the run.
    #[error("failed to check status: {detail}")]
    PollFailed { detail: FailureDetail },

    /// Retrieving the completed job's result failed.
    #[error("failed to fetch result: {detail}")]
    FetchFailed { detail: FailureDetail },

    /// Uploading the source image failed.
    #[error("image upload failed: {detail}")]
    UploadFailed { detail: FailureDetail },

    /// Downloading the model artifact failed.
    #[error("model download failed: {detail}")]
    DownloadFailed { detail: FailureDetail },

    /// A response body did not match the expected schema.
    #[error("malformed {step} response: {reason}")]
    MalformedResponse { step: Step, reason: String },

    /// The run's cancellation token fired.
    #[error("run cancelled")]
    Cancelled,

    /// The run's deadline elapsed.
    #[error("run timed out after {0:?}")]
    Timeout(Duration),

    /// The service reported a status configured as a terminal failure.
    #[error("job {request_id} reached failure status {status}")]
    JobFailed { request_id: String, status: String },

    /// The configured number of status checks passed without completion.
    #[error("job not completed after {attempts} status checks")]
    PollAttemptsExhausted { attempts: u32 },

    /// The request was rejected locally before any network call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No API key was configured.
    #[error(
        "API key is required. Pass it to ClientBuilder::api_key() \
         or set the FAL_KEY environment variable."
    )]
    MissingCredential,

    /// The default HTTP transport could not be constructed.
    #[error("failed to build HTTP transport: {0}")]
    TransportSetup(TransportError),

    /// An I/O error, typically from reading a local image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TripoSrError {
    pub(crate) fn failed(step: Step, detail: FailureDetail) -> Self {
        match step {
            Step::Upload => TripoSrError::UploadFailed { detail },
            Step::Submit => TripoSrError::SubmissionFailed { detail },
            Step::Poll => TripoSrError::PollFailed { detail },
            Step::Fetch => TripoSrError::FetchFailed { detail },
            Step::Download => TripoSrError::DownloadFailed { detail },
        }
    }

    pub(crate) fn malformed(step: Step, reason: impl Into<String>) -> Self {
        TripoSrError::MalformedResponse {
            step,
            reason: reason.into(),
        }
    }

    /// The step this error was raised in, if it belongs to one.
    pub fn step(&self) -> Option<Step> {
        match self {
            TripoSrError::UploadFailed { .. } => Some(Step::Upload),
            TripoSrError::SubmissionFailed { .. } => Some(Step::Submit),
            TripoSrError::PollFailed { .. }
            | TripoSrError::JobFailed { .. }
            | TripoSrError::PollAttemptsExhausted { .. } => Some(Step::Poll),
            TripoSrError::FetchFailed { .. } => Some(Step::Fetch),
            TripoSrError::DownloadFailed { .. } => Some(Step::Download),
            TripoSrError::MalformedResponse { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// HTTP status code of the failed exchange, if the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TripoSrError::SubmissionFailed { detail }
            | TripoSrError::PollFailed { detail }
            | TripoSrError::FetchFailed { detail }
            | TripoSrError::UploadFailed { detail }
            | TripoSrError::DownloadFailed { detail } => match detail {
                FailureDetail::Status { status, .. } => Some(*status),
                FailureDetail::Transport(_) => None,
            },
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, TripoSrError>`.
pub type Result<T> = std::result::Result<T, TripoSrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_maps_step_to_variant() {
        let err = TripoSrError::failed(
            Step::Poll,
            FailureDetail::Status {
                status: 503,
                body: "busy".into(),
            },
        );
        assert!(matches!(err, TripoSrError::PollFailed { .. }));
        assert_eq!(err.step(), Some(Step::Poll));
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.to_string(), "failed to check status: HTTP 503: busy");
    }

    #[test]
    fn transport_failure_has_no_status_code() {
        let err = TripoSrError::failed(
            Step::Submit,
            TransportError::Other("connection reset".into()).into(),
        );
        assert!(matches!(err, TripoSrError::SubmissionFailed { .. }));
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn malformed_names_its_step() {
        let err = TripoSrError::malformed(Step::Fetch, "missing model_mesh.url");
        assert_eq!(
            err.to_string(),
            "malformed fetch response: missing model_mesh.url"
        );
        assert_eq!(err.step(), Some(Step::Fetch));
        assert_eq!(TripoSrError::Cancelled.step(), None);
    }
}
