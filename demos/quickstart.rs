//! Quick-start example for the TripoSR Rust client.
//!
//! Run with:
//!   FAL_KEY=... cargo run --example quickstart -- chair.png
//!
//! Set `RUST_LOG=triposr=debug` to watch the run's state transitions.

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use triposr::{CancellationToken, ClientBuilder, JobRequest, RunEvent, RunOptions};

#[tokio::main]
async fn main() -> triposr::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // -----------------------------------------------------------------------
    // 1. Create a client (reads FAL_KEY from environment)
    // -----------------------------------------------------------------------
    let client = ClientBuilder::new().build()?;

    // -----------------------------------------------------------------------
    // 2. Upload a local image, or use a hosted one
    // -----------------------------------------------------------------------
    let image_url = match std::env::args().nth(1) {
        Some(path) => client.upload_file(&path).await?,
        None => "https://example.com/chair.png".to_string(),
    };
    println!("Image: {image_url}");

    // -----------------------------------------------------------------------
    // 3. Run the job with progress output and a Ctrl-C cancel
    // -----------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let opts = RunOptions {
        poll_interval: Duration::from_secs(3),
        timeout: Some(Duration::from_secs(600)),
        cancel: Some(cancel),
        on_event: Some(Box::new(|event| match event {
            RunEvent::StateChanged(state) => println!("  -> {state:?}"),
            RunEvent::StatusChecked {
                attempt,
                status,
                queue_position,
            } => {
                print!("  [{attempt}] {status}");
                if let Some(pos) = queue_position {
                    print!(" (queue position {pos})");
                }
                println!();
            }
        })),
        ..Default::default()
    };

    let request = JobRequest::new(image_url)
        .remove_background(true)
        .foreground_ratio(0.85)
        .mc_resolution(256);
    let result = client.run(&request, Some(opts)).await?;

    println!("Model: {} ({})", result.file_name, result.format);
    println!("URL: {}", result.url);
    if let Some(t) = result.timings {
        println!("Inference {:.1}s, total {:.1}s", t.inference_time, t.total_time);
    }

    // -----------------------------------------------------------------------
    // 4. Save the artifact
    // -----------------------------------------------------------------------
    let file_name = result.local_file_name();

    let bytes = client.download(&result).await?;
    tokio::fs::write(&file_name, &bytes).await?;
    println!("Saved {} bytes to {}", bytes.len(), file_name);

    Ok(())
}
