use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use crate::utils::{duration_ms, RetryPolicy};
use super::errors::TaskError;

/// 媒体分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".svg", ".tif", ".tiff", ".ico", ".heic",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mov", ".wmv", ".flv", ".mkv", ".webm", ".m4v", ".3gp", ".mpeg", ".mpg",
];

impl MediaCategory {
    pub const ALL: [MediaCategory; 2] = [MediaCategory::Image, MediaCategory::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
        }
    }

    /// 根据 MIME 类型前缀识别
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if mime_type.starts_with("image/") {
            Some(MediaCategory::Image)
        } else if mime_type.starts_with("video/") {
            Some(MediaCategory::Video)
        } else {
            None
        }
    }

    /// 根据扩展名（含点，小写）识别
    pub fn from_extension(extension: &str) -> Option<Self> {
        if IMAGE_EXTENSIONS.contains(&extension) {
            Some(MediaCategory::Image)
        } else if VIDEO_EXTENSIONS.contains(&extension) {
            Some(MediaCategory::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 服务端可能把 `maxSize` 以数字或字符串返回，溢出时为负数
fn deserialize_lenient_size<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match RawSize::deserialize(deserializer)? {
        RawSize::Int(value) => value,
        RawSize::Float(value) => value as i64,
        RawSize::Text(text) => text.trim().parse().unwrap_or(0),
    })
}

/// 单个分类的上传配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    pub allowed_types: Vec<String>,
    #[serde(deserialize_with = "deserialize_lenient_size")]
    pub max_size: i64,
    #[serde(default)]
    pub max_size_formatted: String,
    #[serde(default)]
    pub max_files: usize,
    #[serde(default, deserialize_with = "deserialize_lenient_size")]
    pub chunk_size: i64,
    #[serde(default)]
    pub chunk_size_formatted: String,
    #[serde(default)]
    pub folder: String,
}

/// `GET /api/config` 的响应，按分类显式区分
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadConfigSet {
    pub image: UploadConfig,
    pub video: UploadConfig,
}

impl UploadConfigSet {
    pub fn get(&self, category: MediaCategory) -> &UploadConfig {
        match category {
            MediaCategory::Image => &self.image,
            MediaCategory::Video => &self.video,
        }
    }

    /// 加载时统一扩展名格式：小写并带前导点
    pub fn normalized(mut self) -> Self {
        for config in [&mut self.image, &mut self.video] {
            for extension in config.allowed_types.iter_mut() {
                let lower = extension.trim().to_ascii_lowercase();
                *extension = if lower.starts_with('.') {
                    lower
                } else {
                    format!(".{}", lower)
                };
            }
        }
        self
    }
}

/// 磁盘空间信息，仅用于展示
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    #[serde(default)]
    pub total_formatted: String,
    #[serde(default)]
    pub free_formatted: String,
    #[serde(default)]
    pub used_formatted: String,
    #[serde(default)]
    pub usage_percent: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DiskInfo {
    pub image: DiskUsage,
    pub video: DiskUsage,
}

/// 服务端保存后的文件信息
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub saved_name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub size_formatted: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub chunks: Option<usize>,
}

/// 单个分片的上传请求
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub category: MediaCategory,
    pub file_name: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub file_size: u64,
    pub data: bytes::Bytes,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub uploaded_chunks: usize,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_type: MediaCategory,
    pub file_name: String,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeChunksResponse {
    pub success: bool,
    #[serde(flatten)]
    pub file: StoredFile,
    #[serde(default)]
    pub message: Option<String>,
}

/// `GET /api/upload-progress/:fileName` 的响应
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProgress {
    #[serde(default)]
    pub file_name: String,
    pub uploaded_chunks: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub progress: f64,
}

/// 整文件上传接口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMethod {
    /// `POST /api/multiple-upload`，需要指定分类
    Multiple,
    /// `POST /api/smart-upload`，服务端识别分类
    Smart,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchFileError {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub total_size: u64,
    #[serde(default)]
    pub total_size_formatted: String,
}

/// `multiple-upload` / `smart-upload` 的响应
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub uploaded: Vec<StoredFile>,
    #[serde(default)]
    pub errors: Vec<BatchFileError>,
    #[serde(default)]
    pub summary: Option<ServerSummary>,
}

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 文件稳定标识：`{name}_{size}_{lastModified}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn new(name: &str, size: u64, last_modified: i64) -> Self {
        Self(format!("{}_{}_{}", name, size, last_modified))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TaskState {
    Validating,
    Chunking,
    Uploading,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;

        match (*self, next) {
            (Validating, Chunking) => true,
            // 整文件路径跳过分片
            (Validating, Uploading) => true,
            (Chunking, Uploading) => true,
            (Uploading, Merging) => true,
            (Uploading, Completed) => true,
            (Merging, Completed) => true,
            // 仅重试合并
            (Failed, Merging) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChunkState {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
    pub state: ChunkState,
    pub retries: u32,
}

/// 单个文件的上传任务
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub file_id: FileId,
    pub file_name: String,
    pub category: Option<MediaCategory>,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: usize,
    pub chunks: Vec<Chunk>,
    pub state: TaskState,
    pub errors: Vec<TaskError>,
    pub stored_file: Option<StoredFile>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(file_id: FileId, file_name: String, file_size: u64) -> Self {
        Self {
            id: TaskId::new(),
            file_id,
            file_name,
            category: None,
            file_size,
            chunk_size: 0,
            total_chunks: 0,
            chunks: Vec::new(),
            state: TaskState::Validating,
            errors: Vec::new(),
            stored_file: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn uploaded_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.state == ChunkState::Uploaded)
            .count()
    }

    pub fn all_chunks_uploaded(&self) -> bool {
        !self.chunks.is_empty() && self.uploaded_chunks() == self.chunks.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 最近一次失败的分类
    pub fn failure_kind(&self) -> Option<super::errors::ErrorKind> {
        if self.state == TaskState::Failed {
            self.errors.last().map(|error| error.kind)
        } else {
            None
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerOptions {
    /// 全局并发分片数
    pub concurrency: usize,
    /// 单次分片请求超时
    #[serde(rename = "chunk_timeout_ms", with = "duration_ms")]
    pub chunk_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            chunk_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// 上传事件
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 任务已受理，携带初始快照
    Submitted {
        task_id: TaskId,
        progress: super::progress::ProgressSnapshot,
    },

    /// 任务状态变更
    TaskStateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
        progress: super::progress::ProgressSnapshot,
    },

    /// 分片状态变更
    ChunkStateChanged {
        task_id: TaskId,
        chunk_index: usize,
        from: ChunkState,
        to: ChunkState,
        retries: u32,
        progress: super::progress::ProgressSnapshot,
    },

    /// 任务完成
    Completed {
        task_id: TaskId,
        file: StoredFile,
    },

    /// 任务失败
    Failed {
        task_id: TaskId,
        error: TaskError,
    },

    /// 任务已取消
    Cancelled {
        task_id: TaskId,
    },
}

impl UploadEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            UploadEvent::Submitted { task_id, .. }
            | UploadEvent::TaskStateChanged { task_id, .. }
            | UploadEvent::ChunkStateChanged { task_id, .. }
            | UploadEvent::Completed { task_id, .. }
            | UploadEvent::Failed { task_id, .. }
            | UploadEvent::Cancelled { task_id } => *task_id,
        }
    }
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadTask>();
        assert_send::<UploadEvent>();
        assert_send::<ChunkRequest>();
    }
};
