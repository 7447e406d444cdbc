mod cli;
mod commands;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser};
use pget::utils::parse_cookies;
use pget::{Config, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Parallel, resumable HTTP downloader", long_about = None)]
struct Args {
    /// URL to download
    #[arg(index = 1)]
    url: Option<String>,

    /// Number of concurrent connections (defaults to number of logical CPUs)
    #[arg(short = 'n', long)]
    connections: Option<usize>,

    /// Output path (defaults to the download's name in the current directory)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Cookies sent with every request, e.g. "sid=abc; theme=dark"
    #[arg(short = 'c', long)]
    cookies: Option<String>,

    /// Resume an unfinished download by name
    #[arg(short = 'r', long, value_name = "NAME")]
    resume: Option<String>,

    /// List unfinished downloads
    #[arg(short = 'l', long)]
    list: bool,

    /// Remove temp files after joining without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    insecure: bool,

    /// Directory holding unfinished downloads (defaults to ~/.pget)
    #[arg(long, env = "PGET_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pget=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config {
        data_dir: args.data_dir.clone(),
        insecure: args.insecure,
        rate_limit: args.rate_limit,
        ..Config::default()
    };
    let ctx = Arc::new(Context::new(&config)?);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        if args.list {
            return commands::list_downloads(ctx).await;
        }

        if let Some(name) = args.resume {
            return commands::resume_download(ctx, name, args.output, args.yes).await;
        }

        let Some(url) = args.url else {
            Args::command().print_help()?;
            bail!("a URL, --resume NAME or --list is required");
        };

        let connections = args.connections.unwrap_or_else(num_cpus::get);
        let cookies = args.cookies.as_deref().map(parse_cookies).unwrap_or_default();
        commands::run_download(ctx, url, connections, cookies, args.output, args.yes).await
    })
}
