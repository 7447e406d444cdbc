use anyhow::{Context as _, Result};
use indicatif::HumanBytes;
use pget::progress::BarProgress;
use pget::{AlwaysYes, Confirm, Context, Cookie, Downloader, Session, Settled};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::{listen_for_interrupt, PromptConfirm};

pub async fn run_download(
    ctx: Arc<Context>,
    url: String,
    connections: usize,
    cookies: Vec<Cookie>,
    output: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    let session = Session::probe(&ctx, &url, connections, cookies)
        .await
        .with_context(|| format!("Failed to probe {}", url))?;
    execute(ctx, session, output, yes).await
}

pub async fn resume_download(ctx: Arc<Context>, name: String, output: Option<PathBuf>, yes: bool) -> Result<()> {
    let state = ctx
        .store
        .load(&name)
        .await
        .with_context(|| format!("Failed to load download task {:?}", name))?;
    let session = Session::restore(state)?;
    execute(ctx, session, output, yes).await
}

async fn execute(ctx: Arc<Context>, mut session: Session, output: Option<PathBuf>, yes: bool) -> Result<()> {
    let name = session.state.name.clone();
    println!("Target: {}", name);
    match session.size {
        Some(size) if size > 0 => println!("Download size: {}", HumanBytes(size)),
        _ => println!("Download size: not specified"),
    }

    let bars = Arc::new(BarProgress::new(&session.state.parts));
    let confirm: Box<dyn Confirm> = if yes {
        Box::new(AlwaysYes)
    } else {
        Box::new(PromptConfirm)
    };
    let downloader = Downloader::new(ctx)
        .with_progress(bars.clone())
        .with_confirm(confirm);

    let interrupt = CancellationToken::new();
    listen_for_interrupt(interrupt.clone());

    let outcome = downloader.fetch(&mut session, &interrupt).await;
    bars.clear();

    match downloader.settle(&session, outcome, output.as_deref()).await? {
        Settled::Joined { output, bytes } => {
            println!("Saved {} ({})", output.display(), HumanBytes(bytes));
        }
        Settled::Saved { folder } => {
            println!("Interrupted, state saved to {:?}", folder);
            println!("Resume with: pget -r {}", name);
        }
        Settled::Discarded => {
            println!("Interrupted, {} cannot be resumed and was discarded", name);
        }
    }
    Ok(())
}

pub async fn list_downloads(ctx: Arc<Context>) -> Result<()> {
    let tasks = ctx
        .store
        .list()
        .await
        .context("Failed to read the data directory")?;

    if tasks.is_empty() {
        println!("No unfinished downloads in {:?}.", ctx.store.root());
        return Ok(());
    }

    println!("Currently ongoing downloads:");
    println!("{:<50} {:<10} {:<15} {:<17}", "Name", "Progress", "Size", "Modified");
    println!("{:-<50} {:-<10} {:-<15} {:-<17}", "", "", "", "");

    for task in tasks {
        let modified = task
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        let (progress, size) = match &task.state {
            Some(state) => match state.total_size().filter(|s| *s > 0) {
                Some(total) => (
                    format!("{:.2}%", state.downloaded() as f64 / total as f64 * 100.0),
                    format!("{}", HumanBytes(total)),
                ),
                None => ("-".to_string(), format!("{}+", HumanBytes(state.downloaded()))),
            },
            None => ("unknown".to_string(), "-".to_string()),
        };

        println!("{:<50} {:<10} {:<15} {:<17}", task.name, progress, size, modified);
    }
    Ok(())
}
