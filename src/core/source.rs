use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use super::errors::{Result, TransferError};
use super::limits::file_extension;
use super::types::FileId;

/// 文件内容来源
#[derive(Debug, Clone)]
pub enum SourceData {
    Path(PathBuf),
    Memory(Bytes),
}

/// 待上传文件。名称、大小、修改时间在创建时读取一次
#[derive(Debug, Clone)]
pub struct FileSource {
    pub name: String,
    pub size: u64,
    /// 毫秒时间戳
    pub last_modified: i64,
    pub mime_type: Option<String>,
    data: SourceData,
}

fn invalid_input(message: String) -> TransferError {
    TransferError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
}

impl FileSource {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(invalid_input(format!("not a regular file: {}", path.display())));
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| invalid_input(format!("invalid file name: {}", path.display())))?
            .to_string();

        let last_modified = metadata
            .modified()
            .map(|time| DateTime::<Utc>::from(time).timestamp_millis())
            .unwrap_or(0);

        Ok(Self {
            name,
            size: metadata.len(),
            last_modified,
            mime_type: None,
            data: SourceData::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            last_modified: 0,
            mime_type: None,
            data: SourceData::Memory(data),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: i64) -> Self {
        self.last_modified = last_modified;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn id(&self) -> FileId {
        FileId::new(&self.name, self.size, self.last_modified)
    }

    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }

    pub fn data(&self) -> &SourceData {
        &self.data
    }

    /// 读取 `[offset, offset + length)`
    pub async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                invalid_input(format!(
                    "range {}+{} out of bounds for {} ({} bytes)",
                    offset, length, self.name, self.size
                ))
            })?;

        match &self.data {
            SourceData::Memory(bytes) => {
                if end as usize > bytes.len() {
                    return Err(TransferError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("{} is shorter than {} bytes", self.name, end),
                    )));
                }
                Ok(bytes.slice(offset as usize..end as usize))
            }
            SourceData::Path(path) => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;

                let mut buffer = vec![0u8; length as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }
}
