//! The main entry point for the logtap demo and history viewer.
mod app;

use anyhow::Result;

/// Runs the demo host, or opens the persisted history with `--recover`.
///
/// # Errors
///
/// Returns an error if setup fails or the selected mode fails.
#[tokio::main]
async fn main() -> Result<()> {
    app::launch().await
}
