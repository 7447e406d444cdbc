use futures::StreamExt;
use reqwest::header::{COOKIE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::io::{self, SeekFrom};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::Limiter;
use crate::error::{DownloadError, Result};
use crate::progress::ProgressSink;
use crate::state::Part;

/// Where a part sits in its plan; decides the shape of the Range header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Only,
    Inner,
    Last,
}

impl Position {
    pub fn of(index: usize, count: usize) -> Self {
        if count <= 1 {
            Position::Only
        } else if index + 1 == count {
            Position::Last
        } else {
            Position::Inner
        }
    }

    pub fn is_last(self) -> bool {
        self != Position::Inner
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    Finished,
    Cancelled,
}

/// A worker hands its part back along with how it ended.
pub struct WorkerReport {
    pub index: usize,
    pub part: Part,
    pub result: Result<PartOutcome>,
}

pub struct FetchTask {
    pub index: usize,
    pub position: Position,
    pub part: Part,
    pub url: String,
    pub cookie: Option<String>,
    pub client: Client,
    pub increment: usize,
    pub rate_limiter: Option<Arc<Limiter>>,
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancellationToken,
}

impl FetchTask {
    #[instrument(name = "fetch_part", level = "debug", skip(self), fields(index = self.index))]
    pub async fn run(mut self) -> WorkerReport {
        let result = self.fetch().await;
        match &result {
            Ok(outcome) => debug!(?outcome, current = self.part.current, "Worker stopped"),
            Err(e) => debug!(error = %e, current = self.part.current, "Worker failed"),
        }
        WorkerReport {
            index: self.index,
            part: self.part,
            result,
        }
    }

    /// `Range` header for the remaining bytes. The last part is requested
    /// open-ended because its planned bound is the total size.
    ///
    /// A lone part sends no header on a fresh start, but asks for `bytes=N-`
    /// once it has progress, so a resumed run appends only the missing tail.
    pub fn range_header(&self) -> Option<String> {
        let current = self.part.current;
        match (self.position, self.part.range_to) {
            (Position::Only, _) if current == self.part.range_from => None,
            (Position::Inner, Some(to)) => Some(format!("bytes={}-{}", current, to)),
            _ => Some(format!("bytes={}-", current)),
        }
    }

    async fn fetch(&mut self) -> Result<PartOutcome> {
        if self.part.is_complete(self.position.is_last()) {
            return Ok(PartOutcome::Finished);
        }

        let mut file = self.open_part_file().await?;
        let range = self.range_header();

        let mut request = self.client.get(&self.url);
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie);
        }
        if let Some(range) = &range {
            trace!(range = %range, "Requesting range");
            request = request.header(RANGE, range);
        }

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(PartOutcome::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::PartStatus {
                index: self.index,
                status,
            });
        }
        if range.is_some() && status != StatusCode::PARTIAL_CONTENT {
            if self.position != Position::Only {
                return Err(DownloadError::RangeIgnored { index: self.index });
            }
            warn!("Server ignored the range request, restarting from the beginning");
            self.restart(&mut file).await?;
        }

        let result = self.copy_body(&mut file, response).await;
        let flushed = file
            .flush()
            .await
            .map_err(|e| DownloadError::io(&self.part.path, e));
        let outcome = result?;
        flushed?;

        if outcome == PartOutcome::Finished
            && self.part.range_to.is_some()
            && !self.part.is_complete(self.position.is_last())
        {
            return Err(DownloadError::Truncated {
                index: self.index,
                current: self.part.current,
            });
        }
        Ok(outcome)
    }

    /// Opens the part file for appending, trimmed to what `current` accounts for.
    async fn open_part_file(&mut self) -> Result<File> {
        let path = self.part.path.clone();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;

        let on_disk = file
            .metadata()
            .await
            .map_err(|e| DownloadError::io(&path, e))?
            .len();
        let written = self.part.written();
        if on_disk < written {
            warn!(on_disk, written, "Part file is shorter than recorded, fetching the gap again");
            self.part.current = self.part.range_from + on_disk;
        } else if on_disk > written {
            debug!(on_disk, written, "Dropping unrecorded bytes from part file");
            file.set_len(written)
                .await
                .map_err(|e| DownloadError::io(&path, e))?;
        }
        file.seek(SeekFrom::End(0))
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        Ok(file)
    }

    async fn restart(&mut self, file: &mut File) -> Result<()> {
        let path = self.part.path.clone();
        file.set_len(0).await.map_err(|e| DownloadError::io(&path, e))?;
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        self.part.current = self.part.range_from;
        self.progress.set_current(self.index, self.part.current);
        Ok(())
    }

    /// Streams the body in bounded increments so cancellation is observed
    /// between writes. End of stream is a normal finish.
    async fn copy_body(&mut self, file: &mut File, response: Response) -> Result<PartOutcome> {
        // An inner part never takes bytes past its bound.
        let end = match (self.position, self.part.range_to) {
            (Position::Inner, Some(to)) => Some(to + 1),
            _ => None,
        };
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PartOutcome::Cancelled),
                next = stream.next() => next,
            };
            let chunk = match next {
                Some(chunk) => chunk?,
                None => return Ok(PartOutcome::Finished),
            };

            for slice in chunk.chunks(self.increment) {
                let slice = match end {
                    Some(end) => {
                        let room = end.saturating_sub(self.part.current) as usize;
                        &slice[..slice.len().min(room)]
                    }
                    None => slice,
                };
                if slice.is_empty() {
                    return Ok(PartOutcome::Finished);
                }
                if self.cancel.is_cancelled() {
                    return Ok(PartOutcome::Cancelled);
                }
                if !self.throttle(slice.len()).await? {
                    return Ok(PartOutcome::Cancelled);
                }
                self.write_increment(file, slice).await?;
            }
        }
    }

    /// Waits for the rate limiter. Returns false if cancelled while waiting.
    async fn throttle(&self, len: usize) -> Result<bool> {
        let Some(limiter) = &self.rate_limiter else {
            return Ok(true);
        };
        let Some(n) = NonZeroU32::new(len as u32) else {
            return Ok(true);
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(false),
            ready = limiter.until_n_ready(n) => {
                ready.map_err(|_| DownloadError::RateLimit(n.get()))?;
                Ok(true)
            }
        }
    }

    /// Every byte the file accepts is counted before any error is surfaced.
    async fn write_increment(&mut self, file: &mut File, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match file.write(buf).await {
                Ok(0) => {
                    return Err(DownloadError::io(
                        &self.part.path,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ))
                }
                Ok(n) => {
                    self.part.current += n as u64;
                    buf = &buf[n..];
                }
                Err(e) => return Err(DownloadError::io(&self.part.path, e)),
            }
        }
        self.progress.set_current(self.index, self.part.current);
        Ok(())
    }
}
