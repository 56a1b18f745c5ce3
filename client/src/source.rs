//! Where upload bytes come from, and how they are split into parts.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{ApiError, DriverError};

/// Splits `total_len` bytes into 1-based parts of `chunk_size` bytes; the
/// last part carries the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_len: u64,
    pub chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(total_len: u64, chunk_size: usize) -> Self {
        ChunkPlan {
            total_len,
            chunk_size: chunk_size.max(1) as u64,
        }
    }

    pub fn part_count(&self) -> u32 {
        self.total_len.div_ceil(self.chunk_size) as u32
    }

    /// Byte offset and length of part `part_number`.
    pub fn range(&self, part_number: u32) -> (u64, usize) {
        let offset = (part_number as u64 - 1) * self.chunk_size;
        let len = self.chunk_size.min(self.total_len.saturating_sub(offset));
        (offset, len as usize)
    }
}

#[derive(Debug, Clone)]
enum Origin {
    Memory(Bytes),
    File(PathBuf),
}

/// A file to upload. File-backed sources are read one chunk at a time.
#[derive(Debug, Clone)]
pub struct UploadSource {
    filename: String,
    content_type: String,
    len: u64,
    origin: Origin,
}

impl UploadSource {
    pub fn from_bytes(filename: &str, content_type: &str, data: Bytes) -> Self {
        UploadSource {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            len: data.len() as u64,
            origin: Origin::Memory(data),
        }
    }

    pub async fn open(path: impl AsRef<Path>, content_type: Option<&str>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await.map_err(ApiError::from)?;
        if !metadata.is_file() {
            return Err(DriverError::InvalidInput(format!(
                "{} is not a file",
                path.display()
            )));
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DriverError::InvalidInput(format!("{} has no file name", path.display())))?;
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(&filename).to_string());

        Ok(UploadSource {
            filename,
            content_type,
            len: metadata.len(),
            origin: Origin::File(path.to_path_buf()),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn read_chunk(&self, offset: u64, len: usize) -> Result<Bytes, ApiError> {
        match &self.origin {
            Origin::Memory(data) => {
                let start = offset as usize;
                Ok(data.slice(start..start + len))
            }
            Origin::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

pub fn guess_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
