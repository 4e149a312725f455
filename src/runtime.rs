use anyhow::{Context, Result};

/// The patcher shells out to kubectl one command at a time, so a single threaded runtime is all
/// it needs
pub(crate) fn prepare_tokio_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}
