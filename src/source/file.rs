//! Static file source (`file:///path/to/config.toml`).

use std::path::{Path, PathBuf};
use async_trait::async_trait;

use crate::config::loader::Format;
use crate::source::descriptor::Descriptor;
use crate::source::types::{SourceError, SourceResult};
use crate::source::DataSource;

/// Read-only source backed by a local file. Does not support watching.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    format: Format,
}

impl FileSource {
    /// Open a file source; fails if the file cannot be stat'ed.
    pub async fn open(path: impl Into<PathBuf>, format: Format) -> SourceResult<Self> {
        let path = path.into();
        tokio::fs::metadata(&path).await.map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), ?format, "File source opened");
        Ok(Self { path, format })
    }

    /// Open the file named by a `file://` descriptor.
    pub async fn from_descriptor(descriptor: &Descriptor) -> SourceResult<Self> {
        let path = descriptor_path(descriptor).ok_or_else(|| SourceError::InvalidDescriptor {
            descriptor: descriptor.redacted(),
            reason: "no file path".to_string(),
        })?;
        Self::open(path, Format::from_descriptor(descriptor)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `file:///abs/path` maps to `/abs/path`; `file://rel/path` keeps the
/// host segment as the first path component.
fn descriptor_path(descriptor: &Descriptor) -> Option<PathBuf> {
    if let Ok(path) = descriptor.url().to_file_path() {
        return Some(path);
    }
    let joined = match descriptor.host() {
        Some(host) => format!("{}{}", host, descriptor.path()),
        None => descriptor.path().to_string(),
    };
    (!joined.is_empty()).then(|| PathBuf::from(joined))
}

#[async_trait]
impl DataSource for FileSource {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn format(&self) -> Format {
        self.format
    }

    async fn read(&self) -> SourceResult<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|source| SourceError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_read_is_repeatable() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[database.main]\ndsn = \"mysql://h/app\"").unwrap();

        let url = format!("file://{}", file.path().display());
        let descriptor = Descriptor::parse(&url).unwrap();
        let source = FileSource::from_descriptor(&descriptor).await.unwrap();
        assert_eq!(source.format(), Format::Toml);

        let first = source.read().await.unwrap();
        let second = source.read().await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn test_watch_unsupported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = FileSource::open(file.path(), Format::Json).await.unwrap();
        assert!(!source.supports_watch());
        assert!(matches!(source.watch(), Err(SourceError::WatchUnsupported(_))));
    }

    #[tokio::test]
    async fn test_missing_file_fails_construction() {
        let err = FileSource::open("/definitely/not/here.toml", Format::Toml)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }
}
