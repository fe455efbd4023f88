//! # TripoSR client for Rust
//!
//! Async client for the [fal.ai](https://fal.ai) TripoSR queue, which turns a
//! single image into a downloadable 3D model. A run submits the image, polls
//! the job until it completes, then fetches the artifact descriptor.
//!
//! ## Quick start
//!
//! ```no_run
//! use triposr::{Client, JobRequest};
//!
//! #[tokio::main]
//! async fn main() -> triposr::Result<()> {
//!     let client = Client::new("fal_key_your_api_key");
//!
//!     let request = JobRequest::new("https://example.com/chair.png")
//!         .remove_background(true)
//!         .foreground_ratio(0.9)
//!         .mc_resolution(256);
//!
//!     let result = client.run(&request, None).await?;
//!     println!("{} ({} bytes): {}", result.file_name, result.file_size.unwrap_or(0), result.url);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Cancellation and deadlines
//!
//! By default a run polls every five seconds until the job completes, with no
//! upper bound. [`RunOptions`] adds a deadline, an attempt cap, failure
//! statuses and a [`CancellationToken`]:
//!
//! ```no_run
//! use std::time::Duration;
//! use triposr::{CancellationToken, Client, JobRequest, RunOptions};
//!
//! # async fn example(client: Client) -> triposr::Result<()> {
//! let cancel = CancellationToken::new();
//! let opts = RunOptions {
//!     timeout: Some(Duration::from_secs(600)),
//!     cancel: Some(cancel.clone()),
//!     ..Default::default()
//! };
//!
//! let result = client
//!     .run(&JobRequest::new("https://example.com/chair.png"), Some(opts))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod errors;
mod models;
mod poll;
mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientBuilder};
pub use errors::{FailureDetail, Result, Step, TripoSrError};
pub use models::{
    JobHandle, JobRequest, JobResult, JobStatus, RunEvent, RunOptions, RunState, StatusReport,
    Timings, COSTLY_MC_RESOLUTION,
};
pub use tokio_util::sync::CancellationToken;
pub use transport::{
    FilePart, HttpRequest, HttpResponse, HttpTransport, RequestBody, ReqwestTransport,
    TransportError,
};
