use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::utils::{RetryError, RetryPolicy};
use super::errors::{ErrorKind, Result, TaskError, TransferError, ValidationError};
use super::limits::{detect_category, resolve_limits, validate_file};
use super::planner::plan;
use super::progress::ProgressSnapshot;
use super::source::FileSource;
use super::traits::Transport;
use super::types::{
    Chunk, ChunkRequest, ChunkState, ChunkUploadResponse, MediaCategory, MergeRequest,
    SchedulerOptions, StoredFile, TaskId, TaskState, UploadConfigSet, UploadEvent, UploadTask,
};

/// 任务最终结果
#[derive(Debug)]
enum TaskOutcome {
    Completed(StoredFile),
    Failed {
        kind: ErrorKind,
        errors: Vec<TaskError>,
    },
    Cancelled,
}

/// 单个任务的事件流和结果通道
struct TaskChannels {
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    outcome_tx: oneshot::Sender<TaskOutcome>,
}

impl TaskChannels {
    fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>, oneshot::Receiver<TaskOutcome>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        (Self { events_tx, outcome_tx }, events_rx, outcome_rx)
    }
}

/// 调度器命令
enum SchedulerCommand {
    /// 提交文件
    Submit {
        source: Arc<FileSource>,
        config: Arc<UploadConfigSet>,
        channels: TaskChannels,
        reply: oneshot::Sender<Result<TaskId>>,
    },

    /// 取消
    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 只重试合并
    RetryMerge {
        task_id: TaskId,
        channels: TaskChannels,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 获取任务信息
    GetTask {
        task_id: TaskId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },

    /// 获取所有任务
    GetAllTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },

    /// 停止调度器
    Shutdown,
}

async fn request<T>(
    command_tx: &mpsc::Sender<SchedulerCommand>,
    command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
) -> Result<T> {
    let (reply_tx, reply_rx) = oneshot::channel();
    command_tx
        .send(command(reply_tx))
        .await
        .map_err(|_| TransferError::ManagerShutdown)?;

    reply_rx.await.map_err(|_| TransferError::ManagerShutdown)
}

/// 已提交任务的句柄
///
/// 事件按发生顺序到达，任务进入终态后事件流结束。
pub struct TaskHandle {
    id: TaskId,
    events: mpsc::UnboundedReceiver<UploadEvent>,
    outcome: oneshot::Receiver<TaskOutcome>,
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events.recv().await
    }

    /// 取消任务；重复取消或任务已结束时不做任何事
    pub async fn cancel(&self) -> Result<()> {
        let task_id = self.id;
        request(&self.command_tx, |reply| SchedulerCommand::Cancel { task_id, reply }).await?
    }

    /// 等待任务结束
    pub async fn wait(self) -> Result<StoredFile> {
        match self.outcome.await {
            Ok(TaskOutcome::Completed(file)) => Ok(file),
            Ok(TaskOutcome::Failed { kind, errors }) => Err(TransferError::Task { kind, errors }),
            Ok(TaskOutcome::Cancelled) => Err(TransferError::Cancelled),
            Err(_) => Err(TransferError::ManagerShutdown),
        }
    }
}

/// 分片上传调度器
///
/// 所有任务共享一个容量为 `concurrency` 的槽位池，分片按提交顺序先进先出。
#[derive(Clone)]
pub struct UploadScheduler {
    command_tx: mpsc::Sender<SchedulerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
}

impl UploadScheduler {
    pub fn spawn(transport: Arc<dyn Transport>, options: SchedulerOptions) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(256);

        let worker_handle = tokio::spawn(SchedulerWorker::run(
            transport,
            options,
            command_rx,
            event_tx.clone(),
        ));

        (Self { command_tx, event_tx }, worker_handle)
    }

    pub async fn submit(&self, source: FileSource, config: Arc<UploadConfigSet>) -> Result<TaskHandle> {
        let (channels, events, outcome) = TaskChannels::new();
        let source = Arc::new(source);

        let id = request(&self.command_tx, |reply| SchedulerCommand::Submit {
            source,
            config,
            channels,
            reply,
        })
        .await??;

        Ok(TaskHandle {
            id,
            events,
            outcome,
            command_tx: self.command_tx.clone(),
        })
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        request(&self.command_tx, |reply| SchedulerCommand::Cancel { task_id, reply }).await?
    }

    /// 重新合并一个合并失败的任务，不重传分片
    pub async fn retry_merge(&self, task_id: TaskId) -> Result<TaskHandle> {
        let (channels, events, outcome) = TaskChannels::new();

        request(&self.command_tx, |reply| SchedulerCommand::RetryMerge {
            task_id,
            channels,
            reply,
        })
        .await??;

        Ok(TaskHandle {
            id: task_id,
            events,
            outcome,
            command_tx: self.command_tx.clone(),
        })
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Option<UploadTask>> {
        request(&self.command_tx, |reply| SchedulerCommand::GetTask { task_id, reply }).await
    }

    pub async fn tasks(&self) -> Result<Vec<UploadTask>> {
        request(&self.command_tx, |reply| SchedulerCommand::GetAllTasks { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(SchedulerCommand::Shutdown)
            .await
            .map_err(|_| TransferError::ManagerShutdown)
    }
}

/// 后台任务回报给调度器的消息
enum WorkerReport {
    ChunkAttemptFailed {
        task_id: TaskId,
        chunk_index: usize,
        attempt: u32,
        error: String,
    },
    ChunkRetrying {
        task_id: TaskId,
        chunk_index: usize,
    },
    ChunkFinished {
        task_id: TaskId,
        chunk_index: usize,
        result: std::result::Result<ChunkUploadResponse, RetryError>,
    },
    MergeFinished {
        task_id: TaskId,
        result: std::result::Result<StoredFile, RetryError>,
    },
}

/// 退避期间也一直持有槽位
struct InFlightChunk {
    join_handle: JoinHandle<()>,
    _permit: OwnedSemaphorePermit,
}

struct TaskEntry {
    task: UploadTask,
    /// 任务结束后释放，只保留 `task` 视图
    source: Option<Arc<FileSource>>,
    cancellation_token: CancellationToken,
    channels: Option<TaskChannels>,
    in_flight: HashMap<usize, InFlightChunk>,
    merge_handle: Option<JoinHandle<()>>,
}

impl TaskEntry {
    fn emit(&self, event_tx: &broadcast::Sender<UploadEvent>, event: UploadEvent) {
        if let Some(channels) = &self.channels {
            let _ = channels.events_tx.send(event.clone());
        }
        let _ = event_tx.send(event);
    }

    /// 发送结果并关闭事件流
    fn finish(&mut self, outcome: TaskOutcome) {
        self.source = None;
        if let Some(channels) = self.channels.take() {
            let _ = channels.outcome_tx.send(outcome);
        }
    }
}

struct SchedulerWorker {
    transport: Arc<dyn Transport>,
    options: SchedulerOptions,
    slots: Arc<Semaphore>,
    tasks: HashMap<TaskId, TaskEntry>,
    pending: VecDeque<(TaskId, usize)>,

    event_tx: broadcast::Sender<UploadEvent>,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
}

impl SchedulerWorker {
    async fn run(
        transport: Arc<dyn Transport>,
        options: SchedulerOptions,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
    ) {
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let concurrency = options.concurrency.max(1);
        let mut worker = Self {
            transport,
            options,
            slots: Arc::new(Semaphore::new(concurrency)),
            tasks: HashMap::new(),
            pending: VecDeque::new(),
            event_tx,
            report_tx,
        };

        info!(concurrency, "upload scheduler started");

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::Shutdown) | None => break,
                    Some(command) => worker.handle_command(command),
                },
                Some(report) = report_rx.recv() => {
                    worker.handle_report(report);
                }
            }

            worker.dispatch();
        }

        worker.shutdown();
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Submit { source, config, channels, reply } => {
                let result = self.submit(source, &config, channels);
                let _ = reply.send(result);
            }
            SchedulerCommand::Cancel { task_id, reply } => {
                let result = self.cancel(task_id);
                let _ = reply.send(result);
            }
            SchedulerCommand::RetryMerge { task_id, channels, reply } => {
                let result = self.retry_merge(task_id, channels);
                let _ = reply.send(result);
            }
            SchedulerCommand::GetTask { task_id, reply } => {
                let task = self.tasks.get(&task_id).map(|entry| entry.task.clone());
                let _ = reply.send(task);
            }
            SchedulerCommand::GetAllTasks { reply } => {
                let mut tasks: Vec<_> = self.tasks.values().map(|entry| entry.task.clone()).collect();
                tasks.sort_by_key(|task| task.created_at);
                let _ = reply.send(tasks);
            }
            SchedulerCommand::Shutdown => {}
        }
    }

    fn handle_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::ChunkAttemptFailed { task_id, chunk_index, attempt, error } => {
                if self.is_in_flight(task_id, chunk_index) {
                    debug!(%task_id, chunk_index, attempt, %error, "chunk attempt failed");
                    self.set_chunk_state(task_id, chunk_index, ChunkState::Failed);
                }
            }
            WorkerReport::ChunkRetrying { task_id, chunk_index } => {
                if self.is_in_flight(task_id, chunk_index) {
                    self.set_chunk_state(task_id, chunk_index, ChunkState::Uploading);
                }
            }
            WorkerReport::ChunkFinished { task_id, chunk_index, result } => {
                self.finish_chunk(task_id, chunk_index, result);
            }
            WorkerReport::MergeFinished { task_id, result } => {
                self.finish_merge(task_id, result);
            }
        }
    }

    fn submit(
        &mut self,
        source: Arc<FileSource>,
        config: &UploadConfigSet,
        channels: TaskChannels,
    ) -> Result<TaskId> {
        let file_id = source.id();
        let duplicate = self.tasks.values().any(|entry| {
            entry.task.file_id == file_id
                && !matches!(entry.task.state, TaskState::Failed | TaskState::Cancelled)
        });
        if duplicate {
            return Err(TransferError::DuplicateTask(file_id.to_string()));
        }

        let mut task = UploadTask::new(file_id, source.name.clone(), source.size);
        task.started_at = Some(Utc::now());
        let task_id = task.id;

        let entry = TaskEntry {
            task,
            source: Some(source.clone()),
            cancellation_token: CancellationToken::new(),
            channels: Some(channels),
            in_flight: HashMap::new(),
            merge_handle: None,
        };
        let progress = ProgressSnapshot::of(&entry.task);
        entry.emit(&self.event_tx, UploadEvent::Submitted { task_id, progress });
        self.tasks.insert(task_id, entry);
        info!(%task_id, file_name = %source.name, size = source.size, "task submitted");

        let errors = validate_file(&source, config);
        let category = match detect_category(&source) {
            Some(category) if errors.is_empty() => category,
            _ => {
                let errors = errors
                    .iter()
                    .map(|error| TaskError::validation(&source.name, error))
                    .collect();
                self.fail_task(task_id, ErrorKind::Validation, errors);
                return Ok(task_id);
            }
        };

        let limits = resolve_limits(config.get(category), category);
        self.set_task_state(task_id, TaskState::Chunking);

        let ranges = plan(source.size, limits.chunk_size);
        if ranges.is_empty() {
            let error = ValidationError::EmptyFile {
                file_name: source.name.clone(),
            };
            self.fail_task(
                task_id,
                ErrorKind::Validation,
                vec![TaskError::validation(&source.name, &error)],
            );
            return Ok(task_id);
        }

        let total_chunks = ranges.len();
        if let Some(entry) = self.tasks.get_mut(&task_id) {
            entry.task.category = Some(category);
            entry.task.chunk_size = limits.chunk_size;
            entry.task.total_chunks = total_chunks;
            entry.task.chunks = ranges.into_iter().map(Chunk::from).collect();
        }
        debug!(%task_id, total_chunks, chunk_size = limits.chunk_size, "chunks planned");

        self.set_task_state(task_id, TaskState::Uploading);
        self.pending.extend((0..total_chunks).map(|index| (task_id, index)));

        Ok(task_id)
    }

    fn cancel(&mut self, task_id: TaskId) -> Result<()> {
        let state = self
            .tasks
            .get(&task_id)
            .map(|entry| entry.task.state)
            .ok_or(TransferError::TaskNotFound(task_id))?;

        if state.is_terminal() {
            return Ok(());
        }

        self.stop_task_work(task_id);
        self.set_task_state(task_id, TaskState::Cancelled);

        if let Some(entry) = self.tasks.get_mut(&task_id) {
            entry.emit(&self.event_tx, UploadEvent::Cancelled { task_id });
            entry.finish(TaskOutcome::Cancelled);
        }
        info!(%task_id, "task cancelled");

        Ok(())
    }

    fn retry_merge(&mut self, task_id: TaskId, channels: TaskChannels) -> Result<()> {
        let entry = self
            .tasks
            .get(&task_id)
            .ok_or(TransferError::TaskNotFound(task_id))?;

        if entry.task.failure_kind() != Some(ErrorKind::Merge) || !entry.task.all_chunks_uploaded() {
            return Err(TransferError::InvalidState(format!(
                "task {} has no failed merge to retry",
                task_id
            )));
        }

        let file_id = entry.task.file_id.clone();
        let superseded = self.tasks.values().any(|other| {
            other.task.id != task_id
                && other.task.file_id == file_id
                && !matches!(other.task.state, TaskState::Failed | TaskState::Cancelled)
        });
        if superseded {
            return Err(TransferError::DuplicateTask(file_id.to_string()));
        }

        if let Some(entry) = self.tasks.get_mut(&task_id) {
            entry.cancellation_token = CancellationToken::new();
            entry.channels = Some(channels);
            entry.task.completed_at = None;
        }
        info!(%task_id, "retrying merge");
        self.start_merge(task_id);

        Ok(())
    }

    /// 按先进先出顺序把分片分配到空闲槽位
    fn dispatch(&mut self) {
        while let Some(&(task_id, chunk_index)) = self.pending.front() {
            let runnable = self.tasks.get(&task_id).is_some_and(|entry| {
                entry.task.state == TaskState::Uploading
                    && entry
                        .task
                        .chunks
                        .get(chunk_index)
                        .is_some_and(|chunk| chunk.state == ChunkState::Pending)
            });
            if !runnable {
                self.pending.pop_front();
                continue;
            }

            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                break;
            };
            self.pending.pop_front();
            self.start_chunk(task_id, chunk_index, permit);
        }
    }

    fn start_chunk(&mut self, task_id: TaskId, chunk_index: usize, permit: OwnedSemaphorePermit) {
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return;
        };
        let (Some(category), Some(chunk), Some(source)) = (
            entry.task.category,
            entry.task.chunks.get(chunk_index),
            entry.source.clone(),
        ) else {
            return;
        };

        let job = ChunkJob {
            task_id,
            chunk_index,
            offset: chunk.offset,
            length: chunk.length,
            category,
            file_name: entry.task.file_name.clone(),
            total_chunks: entry.task.total_chunks,
            source,
            transport: self.transport.clone(),
            policy: self.options.retry.clone(),
            request_timeout: self.options.chunk_timeout,
            cancellation_token: entry.cancellation_token.clone(),
            report_tx: self.report_tx.clone(),
        };

        let join_handle = tokio::spawn(job.run());
        entry.in_flight.insert(chunk_index, InFlightChunk { join_handle, _permit: permit });

        self.set_chunk_state(task_id, chunk_index, ChunkState::Uploading);
    }

    fn finish_chunk(
        &mut self,
        task_id: TaskId,
        chunk_index: usize,
        result: std::result::Result<ChunkUploadResponse, RetryError>,
    ) {
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return;
        };
        // 已取消或已失败的任务不再处理迟到的结果
        if entry.in_flight.remove(&chunk_index).is_none() || entry.task.state != TaskState::Uploading {
            return;
        }
        let file_name = entry.task.file_name.clone();

        match result {
            Ok(response) => {
                debug!(%task_id, chunk_index, server_uploaded = response.uploaded_chunks, "chunk uploaded");
                self.set_chunk_state(task_id, chunk_index, ChunkState::Uploaded);

                let all_uploaded = self
                    .tasks
                    .get(&task_id)
                    .is_some_and(|entry| entry.task.all_chunks_uploaded());
                if all_uploaded {
                    self.start_merge(task_id);
                }
            }
            Err(RetryError { attempts, error }) => {
                warn!(%task_id, chunk_index, attempts, %error, "chunk upload failed");
                self.set_chunk_state(task_id, chunk_index, ChunkState::Failed);
                self.fail_task(
                    task_id,
                    ErrorKind::ChunkUpload,
                    vec![TaskError::chunk(&file_name, chunk_index, attempts, &error)],
                );
            }
        }
    }

    fn start_merge(&mut self, task_id: TaskId) {
        let Some(entry) = self.tasks.get(&task_id) else {
            return;
        };
        let file_name = entry.task.file_name.clone();
        let Some(category) = entry.task.category else {
            let error = TransferError::InvalidState("unknown media category".to_string());
            self.fail_task(task_id, ErrorKind::Merge, vec![TaskError::merge(&file_name, 0, &error)]);
            return;
        };

        if !self.set_task_state(task_id, TaskState::Merging) {
            return;
        }
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return;
        };

        let job = MergeJob {
            task_id,
            request: MergeRequest {
                file_type: category,
                file_name,
                total_chunks: entry.task.total_chunks,
            },
            transport: self.transport.clone(),
            policy: self.options.retry.clone(),
            request_timeout: self.options.chunk_timeout,
            cancellation_token: entry.cancellation_token.clone(),
            report_tx: self.report_tx.clone(),
        };

        info!(%task_id, total_chunks = entry.task.total_chunks, "all chunks uploaded, merging");
        entry.merge_handle = Some(tokio::spawn(job.run()));
    }

    fn finish_merge(&mut self, task_id: TaskId, result: std::result::Result<StoredFile, RetryError>) {
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return;
        };
        if entry.task.state != TaskState::Merging {
            return;
        }
        entry.merge_handle = None;
        let file_name = entry.task.file_name.clone();

        match result {
            Ok(file) => {
                entry.task.stored_file = Some(file.clone());
                self.set_task_state(task_id, TaskState::Completed);

                if let Some(entry) = self.tasks.get_mut(&task_id) {
                    entry.emit(
                        &self.event_tx,
                        UploadEvent::Completed {
                            task_id,
                            file: file.clone(),
                        },
                    );
                    entry.finish(TaskOutcome::Completed(file));
                }
                info!(%task_id, %file_name, "task completed");
            }
            Err(RetryError { attempts, error }) => {
                self.fail_task(
                    task_id,
                    ErrorKind::Merge,
                    vec![TaskError::merge(&file_name, attempts, &error)],
                );
            }
        }
    }

    fn fail_task(&mut self, task_id: TaskId, kind: ErrorKind, errors: Vec<TaskError>) {
        self.stop_task_work(task_id);
        if let Some(entry) = self.tasks.get_mut(&task_id) {
            entry.task.errors.extend(errors);
        }

        if !self.set_task_state(task_id, TaskState::Failed) {
            return;
        }
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return;
        };

        let errors = entry.task.errors.clone();
        if let Some(last) = errors.last() {
            entry.emit(
                &self.event_tx,
                UploadEvent::Failed {
                    task_id,
                    error: last.clone(),
                },
            );
        }
        error!(%task_id, %kind, errors = errors.len(), "task failed");
        entry.finish(TaskOutcome::Failed { kind, errors });
    }

    /// 停止任务的所有后台工作，释放槽位，进行中的分片回到 Pending
    fn stop_task_work(&mut self, task_id: TaskId) {
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return;
        };

        entry.cancellation_token.cancel();
        if let Some(handle) = entry.merge_handle.take() {
            handle.abort();
        }

        let interrupted: Vec<usize> = entry
            .in_flight
            .drain()
            .map(|(chunk_index, in_flight)| {
                in_flight.join_handle.abort();
                chunk_index
            })
            .collect();

        for chunk_index in interrupted {
            self.set_chunk_state(task_id, chunk_index, ChunkState::Pending);
        }
    }

    fn is_in_flight(&self, task_id: TaskId, chunk_index: usize) -> bool {
        self.tasks.get(&task_id).is_some_and(|entry| {
            entry.task.state == TaskState::Uploading && entry.in_flight.contains_key(&chunk_index)
        })
    }

    fn set_task_state(&mut self, task_id: TaskId, to: TaskState) -> bool {
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return false;
        };

        let from = entry.task.state;
        if !from.can_transition_to(to) {
            warn!(%task_id, ?from, ?to, "ignored invalid state transition");
            return false;
        }

        entry.task.state = to;
        if to.is_terminal() {
            entry.task.completed_at = Some(Utc::now());
        }

        let progress = ProgressSnapshot::of(&entry.task);
        entry.emit(
            &self.event_tx,
            UploadEvent::TaskStateChanged {
                task_id,
                from,
                to,
                progress,
            },
        );
        true
    }

    fn set_chunk_state(&mut self, task_id: TaskId, chunk_index: usize, to: ChunkState) {
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return;
        };
        let Some(chunk) = entry.task.chunks.get_mut(chunk_index) else {
            return;
        };

        let from = chunk.state;
        if from == to {
            return;
        }

        chunk.state = to;
        if from == ChunkState::Failed && to == ChunkState::Uploading {
            chunk.retries += 1;
        }
        let retries = chunk.retries;

        let progress = ProgressSnapshot::of(&entry.task);
        entry.emit(
            &self.event_tx,
            UploadEvent::ChunkStateChanged {
                task_id,
                chunk_index,
                from,
                to,
                retries,
                progress,
            },
        );
    }

    fn shutdown(&mut self) {
        for entry in self.tasks.values_mut() {
            entry.cancellation_token.cancel();
            if let Some(handle) = entry.merge_handle.take() {
                handle.abort();
            }
            for (_, in_flight) in entry.in_flight.drain() {
                in_flight.join_handle.abort();
            }
        }
        self.pending.clear();
        info!(tasks = self.tasks.len(), "upload scheduler stopped");
    }
}

/// 单个分片的上传工作，含重试
struct ChunkJob {
    task_id: TaskId,
    chunk_index: usize,
    offset: u64,
    length: u64,
    category: MediaCategory,
    file_name: String,
    total_chunks: usize,
    source: Arc<FileSource>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    request_timeout: Duration,
    cancellation_token: CancellationToken,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
}

impl ChunkJob {
    async fn run(self) {
        let ChunkJob {
            task_id,
            chunk_index,
            offset,
            length,
            category,
            file_name,
            total_chunks,
            source,
            transport,
            policy,
            request_timeout,
            cancellation_token,
            report_tx,
        } = self;

        let upload = policy.run(
            |attempt| {
                let transport = transport.clone();
                let source = source.clone();
                let file_name = file_name.clone();
                let report_tx = report_tx.clone();

                async move {
                    if attempt > 1 {
                        let _ = report_tx.send(WorkerReport::ChunkRetrying { task_id, chunk_index });
                    }

                    let data = source.read_range(offset, length).await?;
                    let request = ChunkRequest {
                        category,
                        file_name,
                        chunk_index,
                        total_chunks,
                        file_size: source.size,
                        data,
                    };

                    let response = timeout(request_timeout, transport.upload_chunk(request))
                        .await
                        .map_err(|_| TransferError::Timeout(request_timeout))??;

                    if !response.success {
                        return Err(TransferError::rejected(
                            "chunk upload",
                            response.message.unwrap_or_default(),
                        ));
                    }

                    Ok(response)
                }
            },
            |attempt, error, _| {
                let _ = report_tx.send(WorkerReport::ChunkAttemptFailed {
                    task_id,
                    chunk_index,
                    attempt,
                    error: error.to_string(),
                });
            },
        );

        let result = tokio::select! {
            result = upload => result,
            _ = cancellation_token.cancelled() => return,
        };
        drop(source);

        let _ = report_tx.send(WorkerReport::ChunkFinished {
            task_id,
            chunk_index,
            result,
        });
    }
}

/// 合并请求，与分片共用重试策略，不占用槽位
struct MergeJob {
    task_id: TaskId,
    request: MergeRequest,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    request_timeout: Duration,
    cancellation_token: CancellationToken,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
}

impl MergeJob {
    async fn run(self) {
        let MergeJob {
            task_id,
            request,
            transport,
            policy,
            request_timeout,
            cancellation_token,
            report_tx,
        } = self;

        let merge = policy.run(
            |_| {
                let transport = transport.clone();
                let request = request.clone();

                async move {
                    let response = timeout(request_timeout, transport.merge_chunks(&request))
                        .await
                        .map_err(|_| TransferError::Timeout(request_timeout))??;

                    if !response.success {
                        return Err(TransferError::rejected(
                            "merge",
                            response.message.unwrap_or_default(),
                        ));
                    }

                    Ok(response.file)
                }
            },
            |_, _, _| {},
        );

        let result = tokio::select! {
            result = merge => result,
            _ = cancellation_token.cancelled() => return,
        };

        let _ = report_tx.send(WorkerReport::MergeFinished { task_id, result });
    }
}

// 静态断言确保句柄可以跨任务传递
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<TaskHandle>();
        assert_send::<UploadScheduler>();
    }
};
