use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, COOKIE};
use reqwest::header::HeaderMap;
use tracing::{info, instrument, warn};

use crate::config::Context;
use crate::error::{DownloadError, Result};
use crate::planner;
use crate::state::{Cookie, DownloadState};
use crate::utils::{cookie_header, logical_name};

/// A download descriptor plus what the server told us about the resource.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: DownloadState,
    /// Total length; `None` when the server sent no Content-Length.
    pub size: Option<u64>,
    /// False when byte ranges cannot be trusted for a later restart.
    pub resumable: bool,
}

impl Session {
    /// Probes `url` with a HEAD request and plans a fresh download, or picks
    /// up the saved one when a folder for the derived name already exists.
    #[instrument(level = "debug", skip(ctx, cookies))]
    pub async fn probe(ctx: &Context, url: &str, parallelism: usize, cookies: Vec<Cookie>) -> Result<Session> {
        let mut request = ctx.client.head(url);
        if let Some(cookie) = cookie_header(&cookies) {
            request = request.header(COOKIE, cookie);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::ProbeStatus(response.status()));
        }

        let headers = response.headers();
        let size = content_length(headers)?;
        let disposition = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok());
        let name = logical_name(disposition, url)?;

        if ctx.store.exists(&name).await {
            return match ctx.store.load(&name).await {
                Ok(state) => {
                    info!(name = %name, "Found an unfinished download, resuming it");
                    Session::restore(state)
                }
                Err(DownloadError::NotFound(_)) => {
                    Err(DownloadError::StaleFolder(ctx.store.folder_of(&name)))
                }
                Err(e) => Err(e),
            };
        }

        let parallelism = if supports_ranges(headers) {
            parallelism
        } else {
            warn!("Target does not support range requests, using a single connection");
            1
        };
        if size.is_none() {
            warn!("Target sent no Content-Length, the download will not be resumable");
        }

        ctx.store.create_folder(&name).await?;
        let parts = planner::plan(&ctx.store, &name, size, parallelism);

        Ok(Session {
            state: DownloadState {
                url: url.to_string(),
                name,
                parts,
                cookies,
            },
            size,
            resumable: size.is_some(),
        })
    }

    /// Rehydrates a saved descriptor. Saved downloads are always resumable.
    pub fn restore(state: DownloadState) -> Result<Session> {
        if state.parts.is_empty() {
            return Err(DownloadError::EmptyState(state.name));
        }
        Ok(Session {
            size: state.total_size(),
            state,
            resumable: true,
        })
    }
}

fn supports_ranges(headers: &HeaderMap) -> bool {
    match headers.get(ACCEPT_RANGES).and_then(|v| v.to_str().ok()) {
        Some(value) => {
            let value = value.trim();
            !value.is_empty() && !value.eq_ignore_ascii_case("none")
        }
        None => false,
    }
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    let raw = String::from_utf8_lossy(value.as_bytes()).to_string();
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| DownloadError::InvalidLength(raw))
}
