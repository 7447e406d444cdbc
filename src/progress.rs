use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use crate::state::Part;

/// Receives per-part progress from concurrently running workers.
pub trait ProgressSink: Send + Sync {
    /// `offset` is the part's next unfetched byte.
    fn set_current(&self, index: usize, offset: u64);
    fn finish(&self, index: usize);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn set_current(&self, _index: usize, _offset: u64) {}
    fn finish(&self, _index: usize) {}
}

/// One indicatif bar per part.
pub struct BarProgress {
    multi: MultiProgress,
    bars: Vec<(ProgressBar, u64)>,
}

impl BarProgress {
    pub fn new(parts: &[Part]) -> Self {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        let style = ProgressStyle::default_bar()
            .template("{prefix:>8.yellow} [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        let spinner = ProgressStyle::default_spinner()
            .template("{prefix:>8.yellow} {spinner:.green} {bytes:>12} {bytes_per_sec:>12}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let bars = parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                let bar = match part.range_to {
                    Some(to) => multi
                        .add(ProgressBar::new(to.saturating_sub(part.range_from)))
                        .with_style(style.clone()),
                    None => multi.add(ProgressBar::new_spinner()).with_style(spinner.clone()),
                };
                bar.set_prefix(format!("part{}", i + 1));
                bar.set_position(part.written());
                (bar, part.range_from)
            })
            .collect();

        Self { multi, bars }
    }

    pub fn clear(&self) {
        if let Err(e) = self.multi.clear() {
            debug!(error = %e, "Could not clear progress bars");
        }
    }
}

impl ProgressSink for BarProgress {
    fn set_current(&self, index: usize, offset: u64) {
        if let Some((bar, from)) = self.bars.get(index) {
            bar.set_position(offset.saturating_sub(*from));
        }
    }

    fn finish(&self, index: usize) {
        if let Some((bar, _)) = self.bars.get(index) {
            bar.finish();
        }
    }
}
