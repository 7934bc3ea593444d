mod errors;
mod types;
mod traits;
mod limits;
mod planner;
mod progress;
mod source;
mod scheduler;
mod manager;

#[cfg(test)]
mod tests;

pub use errors::{ErrorKind, Result, TaskError, TransferError, ValidationError};
pub use types::{
    BatchFileError, BatchMethod, Chunk, ChunkRequest, ChunkState, ChunkUploadResponse, DiskInfo,
    DiskUsage, FileId, MediaCategory, MergeChunksResponse, MergeRequest, SchedulerOptions,
    ServerProgress, ServerSummary, StoredFile, TaskId, TaskState, UploadConfig, UploadConfigSet,
    UploadEvent, UploadResponse, UploadTask,
};
pub use traits::Transport;
pub use limits::{
    detect_category, file_extension, parse_size, resolve_limits, validate_file, validate_files,
    EffectiveLimits, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_SIZE,
};
pub use planner::{chunk_count, needs_chunking, plan, ChunkRange};
pub use progress::{percentage, AggregatedProgress, BatchSummary, ProgressAggregator, ProgressSnapshot};
pub use source::{FileSource, SourceData};
pub use scheduler::{TaskHandle, UploadScheduler};
pub use manager::{Reconciliation, UploadManager, UploadManagerBuilder, UploadRoute};
