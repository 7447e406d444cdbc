use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Context;
use crate::error::{DownloadError, Result};
use crate::joiner::join_parts;
use crate::progress::{NoProgress, ProgressSink};
use crate::session::Session;
use crate::state::Part;
use crate::utils::cookie_header;
use crate::worker::{FetchTask, PartOutcome, Position, WorkerReport};

/// How a run of the workers ended.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Interrupted,
    Failed(DownloadError),
}

/// What was done with the parts once the workers stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum Settled {
    Joined { output: PathBuf, bytes: u64 },
    Saved { folder: PathBuf },
    Discarded,
}

/// Asked before the per-download folder is deleted.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

pub struct Downloader {
    ctx: Arc<Context>,
    progress: Arc<dyn ProgressSink>,
    confirm: Box<dyn Confirm>,
}

impl Downloader {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            progress: Arc::new(NoProgress),
            confirm: Box::new(AlwaysYes),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Fetches every part, then joins, saves or discards them.
    pub async fn download(
        &self,
        session: &mut Session,
        output: Option<&Path>,
        interrupt: &CancellationToken,
    ) -> Result<Settled> {
        let outcome = self.fetch(session, interrupt).await;
        self.settle(session, outcome, output).await
    }

    /// Runs one worker per incomplete part until all of them stop.
    ///
    /// Cancelling `interrupt` stops every worker. The first worker error
    /// stops the rest too, and is what the run reports.
    #[instrument(level = "debug", skip_all, fields(name = %session.state.name))]
    pub async fn fetch(&self, session: &mut Session, interrupt: &CancellationToken) -> Outcome {
        let cancel = interrupt.child_token();
        let cookie = cookie_header(&session.state.cookies);
        let mut parts = std::mem::take(&mut session.state.parts);
        let count = parts.len();

        info!(
            name = %session.state.name,
            size = ?session.size,
            parts = count,
            "Starting download"
        );

        let mut failure = None;
        let mut running = FuturesUnordered::new();
        for (index, part) in parts.iter().enumerate() {
            let position = Position::of(index, count);
            if part.is_complete(position.is_last()) {
                debug!(part = index, "Part already complete");
                // An empty resource completes before any byte is written.
                if let Err(e) = ensure_part_file(part).await {
                    error!(part = index, error = %e, "Part failed");
                    if failure.is_none() {
                        cancel.cancel();
                        failure = Some(e);
                    }
                }
                self.progress.finish(index);
                continue;
            }

            let task = FetchTask {
                index,
                position,
                part: part.clone(),
                url: session.state.url.clone(),
                cookie: cookie.clone(),
                client: self.ctx.client.clone(),
                increment: self.ctx.increment,
                rate_limiter: self.ctx.rate_limiter.clone(),
                progress: self.progress.clone(),
                cancel: cancel.clone(),
            };
            let handle = tokio::spawn(task.run());
            running.push(async move { (index, handle.await) });
        }

        let mut stopped_early = false;
        while let Some((index, joined)) = running.next().await {
            let report = match joined {
                Ok(report) => report,
                // The launch-time copy stays in `parts`; the worker truncates
                // its file back to that progress on the next run.
                Err(e) => WorkerReport {
                    index,
                    part: parts[index].clone(),
                    result: Err(DownloadError::Worker {
                        index,
                        reason: e.to_string(),
                    }),
                },
            };
            parts[index] = report.part;

            match report.result {
                Ok(PartOutcome::Finished) => {
                    debug!(part = index, "Part finished");
                    self.progress.finish(index);
                }
                Ok(PartOutcome::Cancelled) => stopped_early = true,
                Err(e) => {
                    error!(part = index, error = %e, "Part failed");
                    if failure.is_none() {
                        cancel.cancel();
                        failure = Some(e);
                    }
                }
            }
        }
        session.state.parts = parts;

        match failure {
            Some(e) => Outcome::Failed(e),
            None if stopped_early => Outcome::Interrupted,
            None => Outcome::Completed,
        }
    }

    /// Acts on a run's outcome: join and clean up, persist for resume, or
    /// leave everything in place and report the error.
    pub async fn settle(&self, session: &Session, outcome: Outcome, output: Option<&Path>) -> Result<Settled> {
        let store = &self.ctx.store;
        let name = &session.state.name;

        match outcome {
            Outcome::Completed => {
                store.save(&session.state).await?;

                let output = output
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".").join(name));
                let paths: Vec<PathBuf> = session.state.parts.iter().map(|p| p.path.clone()).collect();
                let bytes = join_parts(&paths, &output).await?;

                let folder = store.folder_of(name);
                if self.confirm.confirm(&format!("Remove all in {}?", folder.display())) {
                    info!(folder = ?folder, "Deleting temp files");
                    store.remove(name).await?;
                } else {
                    info!(folder = ?folder, "Keeping temp files");
                }
                Ok(Settled::Joined { output, bytes })
            }
            Outcome::Interrupted if session.resumable => {
                info!(name = %name, "Interrupted, saving state");
                store.save(&session.state).await?;
                Ok(Settled::Saved {
                    folder: store.folder_of(name),
                })
            }
            Outcome::Interrupted => {
                warn!(name = %name, "Interrupted, but the download is not resumable; discarding progress");
                store.remove(name).await?;
                Ok(Settled::Discarded)
            }
            Outcome::Failed(e) => {
                if session.resumable {
                    if let Err(save_err) = store.save(&session.state).await {
                        warn!(error = %save_err, "Could not save state after failure");
                    }
                }
                Err(e)
            }
        }
    }
}

async fn ensure_part_file(part: &Part) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&part.path)
        .await
        .map(drop)
        .map_err(|e| DownloadError::io(&part.path, e))
}
