use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{DownloadError, Result};

/// Concatenates `parts`, in the given order, into `output`.
///
/// Order is taken from the caller and never re-derived from file names. The
/// inputs are left untouched. On error the partially written output stays on
/// disk and the error names the file that failed.
pub async fn join_parts(parts: &[PathBuf], output: &Path) -> Result<u64> {
    info!(parts = parts.len(), output = ?output, "Joining parts");

    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .await
        .map_err(|e| DownloadError::io(output, e))?;

    let mut total = 0;
    for path in parts {
        let mut input = File::open(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        let copied = io::copy(&mut input, &mut out)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        debug!(path = ?path, bytes = copied, "Appended part");
        total += copied;
    }

    out.flush().await.map_err(|e| DownloadError::io(output, e))?;
    Ok(total)
}
