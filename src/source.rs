//! Positioned-read sources a [`Container`](crate::Container) materializes
//! blocks from.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::short_read;

/// Random-access byte storage backing an opened container.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Total size in bytes.
    async fn size(&self) -> io::Result<u64>;

    /// Read exactly `length` bytes starting at `start`.
    ///
    /// Fewer available bytes is an [`io::ErrorKind::UnexpectedEof`] error,
    /// never a partial buffer.
    async fn read_at(&self, start: u64, length: usize) -> io::Result<Bytes>;
}

/// A file on disk. Reads are serialized through one handle.
pub struct FileSource {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path).await?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BlockSource for FileSource {
    async fn size(&self) -> io::Result<u64> {
        Ok(self.file.lock().await.metadata().await?.len())
    }

    async fn read_at(&self, start: u64, length: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; length];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(start)).await?;

        let mut filled = 0;
        while filled < length {
            match file.read(&mut buf[filled..]).await? {
                0 => return Err(short_read(start, length, filled)),
                n => filled += n,
            }
        }
        Ok(Bytes::from(buf))
    }
}

/// An in-memory container image.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl BlockSource for MemorySource {
    async fn size(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn read_at(&self, start: u64, length: usize) -> io::Result<Bytes> {
        let available = usize::try_from(start)
            .ok()
            .and_then(|s| self.data.len().checked_sub(s))
            .unwrap_or(0);
        if available < length {
            return Err(short_read(start, length, available));
        }
        let start = start as usize;
        Ok(self.data.slice(start..start + length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_reads_exact_ranges() {
        let source = MemorySource::new(&b"0123456789"[..]);
        assert_eq!(source.size().await.unwrap(), 10);
        assert_eq!(&source.read_at(3, 4).await.unwrap()[..], b"3456");
        assert!(source.read_at(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_source_short_read_is_an_error() {
        let source = MemorySource::new(&b"0123"[..]);
        let err = source.read_at(2, 5).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let err = source.read_at(99, 1).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn file_source_short_read_is_an_error() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"abcdef").unwrap();

        let source = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(source.size().await.unwrap(), 6);
        assert_eq!(&source.read_at(1, 3).await.unwrap()[..], b"bcd");
        let err = source.read_at(4, 8).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
