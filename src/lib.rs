pub mod config;
pub mod downloader;
pub mod error;
pub mod joiner;
pub mod planner;
pub mod progress;
pub mod session;
pub mod state;
pub mod utils;
pub mod worker;

pub use crate::config::{Config, Context};
pub use crate::downloader::{AlwaysYes, Confirm, Downloader, Outcome, Settled};
pub use crate::error::DownloadError;
pub use crate::session::Session;
pub use crate::state::{Cookie, DownloadState, Part, StateStore};
