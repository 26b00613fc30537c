//! The local file-store capability and the `[id<n>]` tag convention.
//!
//! A local audio file advertises its remote identity by embedding the
//! remote track id in a bracketed filename tag, e.g.
//! `Some Song [id42].flac`. Untagged files are never touched by the
//! sync tasks.

use crate::errors::SyncError;
use async_trait::async_trait;
use regex::Regex;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::debug;

/// Capability for the local working directory.
#[async_trait]
pub trait FileStore: Send + Sync + Debug {
    /// Reads a file by name, relative to the store root.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] on failure; a missing file surfaces
    /// as [`std::io::ErrorKind::NotFound`].
    async fn read(&self, name: &str) -> Result<Vec<u8>, SyncError>;

    /// Writes a file by name, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] on failure.
    async fn write(&self, name: &str, data: &[u8]) -> Result<(), SyncError>;

    /// Lists the file names in the store root.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] on failure.
    async fn list(&self) -> Result<Vec<String>, SyncError>;
}

/// A local file whose name carries a remote id tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// The remote id embedded in the filename.
    pub id: u64,
    /// The full file name.
    pub file_name: String,
}

#[allow(clippy::expect_used)]
fn id_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[id(\d+)\]").expect("literal pattern is valid"))
}

/// Extracts the remote id from a `[id<n>]` filename tag, if present.
#[must_use]
pub fn parse_id_tag(file_name: &str) -> Option<u64> {
    id_tag_pattern()
        .captures(file_name)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Scans the store for tagged tracks, skipping untagged files.
///
/// # Errors
///
/// Propagates listing failures from the store.
pub async fn scan_tagged_tracks(store: &dyn FileStore) -> Result<Vec<LocalTrack>, SyncError> {
    let mut tracks = Vec::new();
    for file_name in store.list().await? {
        match parse_id_tag(&file_name) {
            Some(id) => tracks.push(LocalTrack { id, file_name }),
            None => debug!(file = %file_name, "skipping untagged local file"),
        }
    }
    Ok(tracks)
}

/// File store backed by a fixed directory on disk.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStore for DiskStore {
    async fn read(&self, name: &str) -> Result<Vec<u8>, SyncError> {
        Ok(tokio::fs::read(self.root.join(name)).await?)
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(tokio::fs::write(self.root.join(name), data).await?)
    }

    async fn list(&self) -> Result<Vec<String>, SyncError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_id_tags() {
        assert_eq!(parse_id_tag("Song [id42].flac"), Some(42));
        assert_eq!(parse_id_tag("[id7]"), Some(7));
        assert_eq!(parse_id_tag("Song.flac"), None);
        assert_eq!(parse_id_tag("Song [idx].flac"), None);
    }

    #[tokio::test]
    async fn scan_skips_untagged_files() {
        let store = MemoryStore::new();
        store.seed("a [id1].flac", b"x");
        store.seed("notes.txt", b"y");
        store.seed("b [id2].mp3", b"z");

        let tracks = scan_tagged_tracks(&store).await.unwrap();
        let ids: Vec<u64> = tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn disk_store_roundtrips_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        store.write("song [id9].flac", b"data").await.unwrap();
        assert_eq!(store.read("song [id9].flac").await.unwrap(), b"data");
        assert_eq!(store.list().await.unwrap(), vec!["song [id9].flac"]);

        let missing = store.read("absent").await.unwrap_err();
        match missing {
            SyncError::Io(err) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }
}
