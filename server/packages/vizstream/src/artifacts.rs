use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use vizstream_error::VizError;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact store io error: {0}")]
    Io(#[from] io::Error),
}

impl From<ArtifactError> for VizError {
    fn from(value: ArtifactError) -> Self {
        match value {
            ArtifactError::InvalidName(name) => VizError::InvalidRequest {
                message: format!("invalid file name: {name}"),
            },
            ArtifactError::NotFound(name) => VizError::ArtifactNotFound { name },
            ArtifactError::Io(err) => VizError::StreamError {
                message: err.to_string(),
            },
        }
    }
}

/// Flat directory of generated files addressed by name.
///
/// Blocking; async callers go through `spawn_blocking`. Writes land in a
/// temporary file in the same directory and are renamed into place, so
/// readers never see a partial file. Same-name writes are last writer wins.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub fn put(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ArtifactError> {
        let path = self.resolve(name)?;
        fs::create_dir_all(&self.root)?;
        let mut temp = NamedTempFile::new_in(&self.root)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|err| ArtifactError::Io(err.error))?;
        Ok(path)
    }

    pub fn get(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.resolve(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// `Ok(false)` when nothing was stored under `name`.
    pub fn delete(&self, name: &str) -> Result<bool, ArtifactError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// A single normal path component without hidden-file or separator tricks.
pub fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let invalid = || ArtifactError::InvalidName(name.to_string());
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Reduces a remote-supplied name to its final path component, or `None` if
/// nothing safe remains.
pub fn safe_file_name(name: &str) -> Option<String> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    validate_name(last).ok().map(|_| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("nested/artifacts"));
        let bytes = b"\x89PNG\r\n\x1a\nrest".to_vec();

        store.put("a.png", &bytes).expect("put");
        assert_eq!(store.get("a.png").expect("get"), bytes);
        assert!(store.delete("a.png").expect("delete"));
        assert!(matches!(store.get("a.png"), Err(ArtifactError::NotFound(_))));
        assert!(!store.delete("a.png").expect("second delete"));
    }

    #[test]
    fn overwrite_is_last_writer_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        store.put("chart.png", b"first").expect("put");
        store.put("chart.png", b"second").expect("put");
        assert_eq!(store.get("chart.png").expect("get"), b"second");
        let entries = fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn rejects_unsafe_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        for name in ["", "../x.png", "a/b.png", ".hidden", "..", "c:\\x"] {
            assert!(
                matches!(store.put(name, b"x"), Err(ArtifactError::InvalidName(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn remote_names_reduce_to_last_component() {
        assert_eq!(safe_file_name("/tmp/out/chart.png").as_deref(), Some("chart.png"));
        assert_eq!(safe_file_name("..\\..\\plot.svg").as_deref(), Some("plot.svg"));
        assert_eq!(safe_file_name("dir/"), None);
        assert_eq!(safe_file_name("../.."), None);
    }
}
