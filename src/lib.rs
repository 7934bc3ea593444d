pub mod core;
pub mod uploaders;
pub mod utils;
pub mod config;

// 重新导出核心类型
pub use core::{
    BatchMethod,
    ErrorKind,
    FileSource,
    MediaCategory,
    ProgressAggregator,
    ProgressSnapshot,
    Result,
    SchedulerOptions,
    TaskHandle,
    TaskId,
    TaskState,
    TransferError,
    Transport,
    UploadEvent,
    UploadManager,
    UploadManagerBuilder,
    UploadRoute,
    UploadTask,
};

// 重新导出上传器
pub use uploaders::{
    BatchJob,
    BatchUploader,
    HttpTransport,
};

pub use utils::{format_bytes, RetryPolicy};
