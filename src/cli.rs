use pget::Confirm;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Asks on the terminal before deleting anything.
///
/// Must be called from the binary's multi-threaded runtime; the prompt reads
/// stdin on the current worker thread.
pub struct PromptConfirm;

impl Confirm for PromptConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        tokio::task::block_in_place(|| {
            inquire::Confirm::new(prompt)
                .with_default(true)
                .prompt()
                .unwrap_or(false)
        })
    }
}

/// Cancels `token` on the first SIGINT, SIGTERM or SIGHUP. Later signals are
/// ignored while the shutdown is in progress.
pub fn listen_for_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signals(&token).await {
            warn!(error = %e, "Could not install signal handlers");
        }
    });
}

fn interrupt(token: &CancellationToken) {
    if token.is_cancelled() {
        debug!("Already shutting down");
    } else {
        warn!("Interrupt received, stopping workers");
        token.cancel();
    }
}

#[cfg(unix)]
async fn wait_for_signals(token: &CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = hangup.recv() => {},
            _ = int.recv() => {},
            _ = terminate.recv() => {},
        }
        interrupt(token);
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(token: &CancellationToken) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        interrupt(token);
    }
}
