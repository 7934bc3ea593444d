use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use super::types::TaskId;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    /// 服务端返回 `success: false`
    #[error("Server rejected {operation}: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Validation failed: {}", join_display(.0))]
    Validation(Vec<ValidationError>),

    #[error("Task failed ({kind}): {}", join_display(.errors))]
    Task {
        kind: ErrorKind,
        errors: Vec<TaskError>,
    },

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Duplicate task for file {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Manager shutdown")]
    ManagerShutdown,
}

impl TransferError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }

    /// 传输层错误都会计入重试次数；取消、校验等错误立即终止
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Io(_)
                | TransferError::Http(_)
                | TransferError::Json(_)
                | TransferError::Server { .. }
                | TransferError::Rejected { .. }
                | TransferError::Timeout(_)
        )
    }

    /// 对调用方暴露的错误分类
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TransferError::Validation(_) => Some(ErrorKind::Validation),
            TransferError::Task { kind, .. } => Some(*kind),
            TransferError::Cancelled => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 任务级失败的分类标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    ChunkUpload,
    Merge,
    BatchUpload,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ChunkUpload => "chunk-upload",
            ErrorKind::Merge => "merge",
            ErrorKind::BatchUpload => "batch-upload",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务错误列表中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub file_name: String,
    pub chunk_index: Option<usize>,
    pub attempts: u32,
    pub message: String,
}

impl TaskError {
    pub fn validation(file_name: &str, error: &ValidationError) -> Self {
        Self {
            kind: ErrorKind::Validation,
            file_name: file_name.to_string(),
            chunk_index: None,
            attempts: 0,
            message: error.to_string(),
        }
    }

    pub fn chunk(file_name: &str, chunk_index: usize, attempts: u32, error: &TransferError) -> Self {
        Self {
            kind: ErrorKind::ChunkUpload,
            file_name: file_name.to_string(),
            chunk_index: Some(chunk_index),
            attempts,
            message: error.to_string(),
        }
    }

    pub fn merge(file_name: &str, attempts: u32, error: &TransferError) -> Self {
        Self {
            kind: ErrorKind::Merge,
            file_name: file_name.to_string(),
            chunk_index: None,
            attempts,
            message: format!("merge failed: {}", error),
        }
    }

    pub fn batch(file_name: &str, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::BatchUpload,
            file_name: file_name.to_string(),
            chunk_index: None,
            attempts,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.chunk_index) {
            (ErrorKind::Validation, _) => write!(f, "{}: {}", self.file_name, self.message),
            (_, Some(index)) => write!(
                f,
                "{}: chunk {} failed after {} attempts: {}",
                self.file_name, index, self.attempts, self.message
            ),
            (_, None) => write!(
                f,
                "{}: {} after {} attempts",
                self.file_name, self.message, self.attempts
            ),
        }
    }
}

/// 文件校验错误，均不可重试
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Unsupported file type: {file_name}")]
    UnsupportedType { file_name: String },

    #[error("Unsupported file format: {file_name} ({extension})")]
    DisallowedExtension { file_name: String, extension: String },

    #[error("File too large: {file_name} ({size} > {limit})")]
    TooLarge {
        file_name: String,
        size: String,
        limit: String,
    },

    #[error("Empty file: {file_name}")]
    EmptyFile { file_name: String },
}

impl ValidationError {
    pub fn file_name(&self) -> &str {
        match self {
            ValidationError::UnsupportedType { file_name }
            | ValidationError::DisallowedExtension { file_name, .. }
            | ValidationError::TooLarge { file_name, .. }
            | ValidationError::EmptyFile { file_name } => file_name,
        }
    }
}
