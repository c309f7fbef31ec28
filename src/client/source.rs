//! Read-only byte sources that parts are sliced from.

use bytes::Bytes;
use std::{
    future::Future,
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

/// Something a part's byte range can be read from.
///
/// Implementations must be safe to read concurrently: every in-flight part
/// reads its own range with no shared cursor.
pub trait ByteSource: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Bytes `[start, end)`.
    fn read_range(&self, start: u64, end: u64) -> impl Future<Output = io::Result<Bytes>> + Send;
}

impl ByteSource for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        let len = self.len() as u64;
        if start > end || end > len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside of {len} bytes"),
            ));
        }
        Ok(self.slice(start as usize..end as usize))
    }
}

/// A file on disk. Each read opens its own handle.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            path,
            size: metadata.len(),
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        if start > end || end > self.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside of {} bytes", self.size),
            ));
        }
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn file_ranges_match_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        tmp.write_all(&data).unwrap();

        let source = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(source.size(), 10_000);
        let slice = source.read_range(4096, 8192).await.unwrap();
        assert_eq!(&slice[..], &data[4096..8192]);
        assert!(source.read_range(9_000, 10_001).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_ranges_are_zero_copy_slices() {
        let source = Bytes::from_static(b"0123456789");
        assert_eq!(source.read_range(3, 7).await.unwrap(), Bytes::from_static(b"3456"));
        assert!(source.read_range(8, 11).await.is_err());
    }
}
