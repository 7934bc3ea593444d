use std::collections::HashMap;
use serde::Serialize;
use super::types::{TaskId, TaskState, UploadEvent, UploadTask};

/// 四舍五入的百分比，`total` 为 0 时返回 0
pub fn percentage(uploaded: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }

    ((uploaded.min(total) as f64 / total as f64) * 100.0).round() as u8
}

/// 单个任务的进度快照，随每个事件一起发出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub task_id: TaskId,
    pub file_name: String,
    pub state: TaskState,
    pub uploaded_chunks: usize,
    pub total_chunks: usize,
    pub percentage: u8,
}

impl ProgressSnapshot {
    pub fn of(task: &UploadTask) -> Self {
        let uploaded_chunks = task.uploaded_chunks();
        let total_chunks = task.chunks.len();
        // 完成后始终为 100，包括空文件
        let percentage = if task.state == TaskState::Completed {
            100
        } else {
            percentage(uploaded_chunks, total_chunks)
        };

        Self {
            task_id: task.id,
            file_name: task.file_name.clone(),
            state: task.state,
            uploaded_chunks,
            total_chunks,
            percentage,
        }
    }
}

/// 批次结束后的汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
}

impl BatchSummary {
    /// 所有任务都进入终态后才有汇总
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a UploadTask>) -> Option<Self> {
        let mut summary = BatchSummary {
            total: 0,
            success: 0,
            failed: 0,
            total_bytes: 0,
            uploaded_bytes: 0,
        };

        for task in tasks {
            if !task.is_terminal() {
                return None;
            }

            summary.total += 1;
            summary.total_bytes += task.file_size;
            if task.state == TaskState::Completed {
                summary.success += 1;
                summary.uploaded_bytes += task.file_size;
            } else {
                summary.failed += 1;
            }
        }

        Some(summary)
    }
}

/// 多个任务的整体进度
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedProgress {
    pub total_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub uploaded_chunks: usize,
    pub total_chunks: usize,
    pub percentage: u8,
}

/// 根据事件流维护每个任务的最新快照
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    snapshots: HashMap<TaskId, ProgressSnapshot>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &UploadEvent) {
        match event {
            UploadEvent::Submitted { progress, .. }
            | UploadEvent::TaskStateChanged { progress, .. }
            | UploadEvent::ChunkStateChanged { progress, .. } => {
                self.snapshots.insert(progress.task_id, progress.clone());
            }
            UploadEvent::Completed { .. }
            | UploadEvent::Failed { .. }
            | UploadEvent::Cancelled { .. } => {}
        }
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<&ProgressSnapshot> {
        self.snapshots.get(task_id)
    }

    pub fn remove(&mut self, task_id: &TaskId) -> Option<ProgressSnapshot> {
        self.snapshots.remove(task_id)
    }

    pub fn overall(&self) -> AggregatedProgress {
        let mut overall = AggregatedProgress::default();

        for snapshot in self.snapshots.values() {
            overall.total_tasks += 1;
            overall.uploaded_chunks += snapshot.uploaded_chunks;
            overall.total_chunks += snapshot.total_chunks;
            match snapshot.state {
                TaskState::Completed => overall.completed_tasks += 1,
                TaskState::Failed => overall.failed_tasks += 1,
                TaskState::Cancelled => overall.cancelled_tasks += 1,
                _ => overall.active_tasks += 1,
            }
        }

        overall.percentage = percentage(overall.uploaded_chunks, overall.total_chunks);
        overall
    }
}
