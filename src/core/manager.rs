use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use crate::uploaders::{BatchJob, BatchUploader};
use crate::utils::RetryPolicy;
use super::errors::{Result, TransferError, ValidationError};
use super::limits::{detect_category, resolve_limits, validate_file, validate_files};
use super::planner::needs_chunking;
use super::scheduler::{TaskHandle, UploadScheduler};
use super::source::FileSource;
use super::traits::Transport;
use super::types::{
    BatchMethod, DiskInfo, SchedulerOptions, TaskId, UploadConfigSet, UploadEvent, UploadTask,
};

/// `upload` 的路由结果
pub enum UploadRoute {
    /// 分片上传，任务在后台进行
    Chunked(TaskHandle),
    /// 整文件上传，已经结束
    Batch(BatchJob),
}

/// 本地记录与服务端已收到分片数的比对
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub task_id: TaskId,
    pub file_name: String,
    pub local_uploaded: usize,
    pub server_uploaded: usize,
    pub total_chunks: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.local_uploaded == self.server_uploaded
    }
}

pub struct UploadManagerBuilder {
    transport: Option<Arc<dyn Transport>>,
    options: SchedulerOptions,
    config: Option<UploadConfigSet>,
}

impl Default for UploadManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadManagerBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            options: SchedulerOptions::default(),
            config: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.options.concurrency = concurrency;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.options.chunk_timeout = timeout;
        self
    }

    /// 预置上传配置，不再向服务端请求
    pub fn config(mut self, config: UploadConfigSet) -> Self {
        self.config = Some(config.normalized());
        self
    }

    /// 需要在 tokio 运行时中调用
    pub fn build(self) -> Result<UploadManager> {
        let transport = self
            .transport
            .ok_or_else(|| TransferError::InvalidState("transport is not configured".to_string()))?;

        let batch = BatchUploader::new(transport.clone(), self.options.retry.clone());
        let (scheduler, worker_handle) = UploadScheduler::spawn(transport.clone(), self.options);

        Ok(UploadManager {
            transport,
            scheduler,
            worker_handle,
            batch,
            config: RwLock::new(self.config.map(Arc::new)),
        })
    }
}

/// 上传入口：配置缓存、校验、路由，以及任务的查询和控制
pub struct UploadManager {
    transport: Arc<dyn Transport>,
    scheduler: UploadScheduler,
    worker_handle: JoinHandle<()>,
    batch: BatchUploader,
    config: RwLock<Option<Arc<UploadConfigSet>>>,
}

impl UploadManager {
    pub fn builder() -> UploadManagerBuilder {
        UploadManagerBuilder::new()
    }

    /// 当前会话的上传配置，首次调用时从服务端加载
    pub async fn config(&self) -> Result<Arc<UploadConfigSet>> {
        if let Some(config) = self.config.read().await.as_ref() {
            return Ok(config.clone());
        }

        self.refresh_config().await
    }

    pub async fn refresh_config(&self) -> Result<Arc<UploadConfigSet>> {
        let config = Arc::new(self.transport.fetch_config().await?.normalized());
        *self.config.write().await = Some(config.clone());
        info!(
            image_types = config.image.allowed_types.len(),
            video_types = config.video.allowed_types.len(),
            "upload config loaded"
        );

        Ok(config)
    }

    pub async fn disk_info(&self) -> Result<DiskInfo> {
        self.transport.disk_info().await
    }

    /// 校验一组文件，返回全部错误
    pub async fn validate(&self, files: &[FileSource]) -> Result<Vec<ValidationError>> {
        let config = self.config().await?;
        Ok(validate_files(files, &config))
    }

    /// 校验后按大小路由：超过一个分片走调度器，否则整文件上传
    pub async fn upload(&self, source: FileSource) -> Result<UploadRoute> {
        let config = self.config().await?;

        let errors = validate_file(&source, &config);
        if !errors.is_empty() {
            return Err(TransferError::Validation(errors));
        }

        let chunked = detect_category(&source).is_some_and(|category| {
            let limits = resolve_limits(config.get(category), category);
            needs_chunking(source.size, limits.chunk_size)
        });

        if chunked {
            let handle = self.scheduler.submit(source, config).await?;
            Ok(UploadRoute::Chunked(handle))
        } else {
            let job = self.batch.upload(vec![source], &config, BatchMethod::Smart).await;
            Ok(UploadRoute::Batch(job))
        }
    }

    /// 直接提交到调度器，校验失败的文件得到一个失败的任务
    pub async fn upload_chunked(&self, source: FileSource) -> Result<TaskHandle> {
        let config = self.config().await?;
        self.scheduler.submit(source, config).await
    }

    pub async fn upload_batch(&self, files: Vec<FileSource>, method: BatchMethod) -> Result<BatchJob> {
        let config = self.config().await?;
        Ok(self.batch.upload(files, &config, method).await)
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        self.scheduler.cancel(task_id).await
    }

    pub async fn retry_merge(&self, task_id: TaskId) -> Result<TaskHandle> {
        self.scheduler.retry_merge(task_id).await
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Option<UploadTask>> {
        self.scheduler.task(task_id).await
    }

    pub async fn tasks(&self) -> Result<Vec<UploadTask>> {
        self.scheduler.tasks().await
    }

    /// 比对服务端已收到的分片数
    pub async fn reconcile(&self, task_id: TaskId) -> Result<Reconciliation> {
        let task = self
            .scheduler
            .task(task_id)
            .await?
            .ok_or(TransferError::TaskNotFound(task_id))?;

        let server = self.transport.upload_progress(&task.file_name).await?;
        let reconciliation = Reconciliation {
            task_id,
            file_name: task.file_name.clone(),
            local_uploaded: task.uploaded_chunks(),
            server_uploaded: server.uploaded_chunks,
            total_chunks: task.total_chunks,
        };

        if !reconciliation.is_consistent() {
            warn!(
                %task_id,
                file_name = %task.file_name,
                local = reconciliation.local_uploaded,
                server = reconciliation.server_uploaded,
                "server chunk count differs from local state"
            );
        }

        Ok(reconciliation)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.scheduler.subscribe()
    }

    /// 停止调度器并等待后台任务退出，未完成的任务句柄会得到 `ManagerShutdown`
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.shutdown().await?;
        self.worker_handle
            .await
            .map_err(|_| TransferError::ManagerShutdown)
    }
}
