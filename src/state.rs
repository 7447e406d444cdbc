use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{DownloadError, Result};

pub const STATE_FILE_NAME: &str = "state.json";

/// One contiguous byte range of the remote resource and how far it has been fetched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub path: PathBuf,
    /// Next unfetched offset.
    pub current: u64,
    pub range_from: u64,
    /// Inclusive upper bound. `None` while the resource size is unknown; the
    /// part then runs until end of stream. The last part of a plan carries the
    /// total size here, not `size - 1`.
    pub range_to: Option<u64>,
}

impl Part {
    pub fn new(path: PathBuf, range_from: u64, range_to: Option<u64>) -> Self {
        Self {
            path,
            current: range_from,
            range_from,
            range_to,
        }
    }

    /// The last part's bound is the total size, so reaching it means the
    /// resource ended; every other part must move past its bound.
    pub fn is_complete(&self, is_last: bool) -> bool {
        match self.range_to {
            Some(to) if is_last => self.current >= to,
            Some(to) => self.current > to,
            None => false,
        }
    }

    /// Bytes of this part already sitting in its part file.
    pub fn written(&self) -> u64 {
        self.current.saturating_sub(self.range_from)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Durable identity of one download, keyed by `name`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DownloadState {
    pub url: String,
    pub name: String,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
}

impl DownloadState {
    pub fn downloaded(&self) -> u64 {
        self.parts.iter().map(Part::written).sum()
    }

    /// Total resource size as recorded by the last part, if known.
    pub fn total_size(&self) -> Option<u64> {
        self.parts.last().and_then(|p| p.range_to)
    }
}

/// An entry in the data directory, as shown by `pget -l`.
#[derive(Debug)]
pub struct TaskEntry {
    pub name: String,
    pub state: Option<DownloadState>,
    pub modified: Option<DateTime<Local>>,
}

/// Folder-per-download persistence under a single data directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn state_path(&self, name: &str) -> PathBuf {
        self.folder_of(name).join(STATE_FILE_NAME)
    }

    pub fn part_path(&self, name: &str, index: usize) -> PathBuf {
        self.folder_of(name).join(format!("{}.part{}", name, index))
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::symlink_metadata(self.folder_of(name)).await.is_ok()
    }

    pub async fn create_folder(&self, name: &str) -> Result<PathBuf> {
        let folder = self.folder_of(name);
        fs::create_dir_all(&folder)
            .await
            .map_err(|e| DownloadError::io(&folder, e))?;
        Ok(folder)
    }

    pub async fn save(&self, state: &DownloadState) -> Result<()> {
        let folder = self.create_folder(&state.name).await?;
        let path = folder.join(STATE_FILE_NAME);
        let content = serde_json::to_vec_pretty(state).map_err(DownloadError::Encode)?;
        fs::write(&path, content)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        debug!(path = ?path, parts = state.parts.len(), "Saved state");
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<DownloadState> {
        let path = self.state_path(name);
        debug!(path = ?path, "Loading saved state");
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DownloadError::NotFound(name.to_string()))
            }
            Err(e) => return Err(DownloadError::io(&path, e)),
        };
        serde_json::from_slice(&content).map_err(|source| DownloadError::CorruptState { path, source })
    }

    /// Deletes the per-download folder: part files and state record alike.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let folder = self.folder_of(name);
        match fs::remove_dir_all(&folder).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::io(&folder, e)),
        }
    }

    pub async fn list(&self) -> Result<Vec<TaskEntry>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(DownloadError::io(&self.root, e)),
        };

        let mut tasks = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DownloadError::io(&self.root, e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let state = self.load(&name).await.ok();
            let modified = metadata.modified().ok().map(DateTime::<Local>::from);
            tasks.push(TaskEntry {
                name,
                state,
                modified,
            });
        }
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(store: &StateStore, progress: &[(u64, u64, Option<u64>)]) -> DownloadState {
        DownloadState {
            url: "http://example.com/file.bin".to_string(),
            name: "file.bin".to_string(),
            parts: progress
                .iter()
                .enumerate()
                .map(|(i, &(from, current, to))| Part {
                    path: store.part_path("file.bin", i),
                    current,
                    range_from: from,
                    range_to: to,
                })
                .collect(),
            cookies: vec![],
        }
    }

    #[tokio::test]
    async fn save_then_load_returns_same_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        for progress in [
            vec![],
            vec![(0, 0, None)],
            vec![(0, 50, Some(49)), (50, 70, Some(100))],
            vec![(0, 12, Some(32)), (33, 33, Some(65)), (66, 99, Some(100))],
        ] {
            let mut state = sample(&store, &progress);
            state.cookies = vec![Cookie {
                name: "sid".into(),
                value: "abc".into(),
            }];
            store.save(&state).await.unwrap();
            assert_eq!(store.load("file.bin").await.unwrap(), state);
        }
    }

    #[tokio::test]
    async fn record_uses_stable_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = sample(&store, &[(50, 70, Some(100))]);
        store.save(&state).await.unwrap();

        let raw = std::fs::read_to_string(store.state_path("file.bin")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["url"], "http://example.com/file.bin");
        assert_eq!(value["name"], "file.bin");
        assert_eq!(value["parts"][0]["current"], 70);
        assert_eq!(value["parts"][0]["rangeFrom"], 50);
        assert_eq!(value["parts"][0]["rangeTo"], 100);
        assert!(value.get("cookies").is_none());
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(
            store.load("nothing").await,
            Err(DownloadError::NotFound(_))
        ));

        store.create_folder("empty").await.unwrap();
        assert!(matches!(
            store.load("empty").await,
            Err(DownloadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_record_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.create_folder("bad").await.unwrap();
        std::fs::write(store.state_path("bad"), b"{\"url\": 3").unwrap();

        assert!(matches!(
            store.load("bad").await,
            Err(DownloadError::CorruptState { .. })
        ));
    }

    #[tokio::test]
    async fn list_reports_folders_with_and_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = sample(&store, &[(0, 10, Some(49)), (50, 50, Some(100))]);
        store.save(&state).await.unwrap();
        store.create_folder("orphan").await.unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let tasks = store.list().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].name, "file.bin");
        assert_eq!(tasks[0].state.as_ref().unwrap().downloaded(), 10);
        assert_eq!(tasks[1].name, "orphan");
        assert!(tasks[1].state.is_none());
    }

    #[test]
    fn completion_treats_last_part_bound_as_total_size() {
        let mut first = Part::new(PathBuf::from("a.part0"), 0, Some(49));
        first.current = 49;
        assert!(!first.is_complete(false));
        first.current = 50;
        assert!(first.is_complete(false));

        let mut last = Part::new(PathBuf::from("a.part1"), 50, Some(100));
        last.current = 99;
        assert!(!last.is_complete(true));
        last.current = 100;
        assert!(last.is_complete(true));

        let open = Part::new(PathBuf::from("a.part0"), 0, None);
        assert!(!open.is_complete(true));
    }
}
