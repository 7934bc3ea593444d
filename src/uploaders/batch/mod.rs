use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use crate::core::{
    detect_category, plan, validate_file, BatchMethod, BatchSummary, Chunk, ChunkState, FileSource,
    MediaCategory, StoredFile, TaskError, TaskState, Transport, UploadConfigSet, UploadResponse,
    UploadTask,
};
use crate::utils::{RetryError, RetryPolicy};

/// 一次整文件上传的结果
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: Uuid,
    pub method: BatchMethod,
    pub tasks: Vec<UploadTask>,
    /// 所有任务进入终态后才有值
    pub summary: Option<BatchSummary>,
}

impl BatchJob {
    pub fn completed(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks.iter().filter(|task| task.state == TaskState::Completed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks.iter().filter(|task| task.state == TaskState::Failed)
    }
}

/// 小文件上传器，整文件走 `multiple-upload` / `smart-upload`
pub struct BatchUploader {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl BatchUploader {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// 上传一批文件。校验失败的文件单独失败，不影响其他文件
    pub async fn upload(
        &self,
        files: Vec<FileSource>,
        config: &UploadConfigSet,
        method: BatchMethod,
    ) -> BatchJob {
        let mut tasks: Vec<UploadTask> = files
            .iter()
            .map(|file| {
                let mut task = UploadTask::new(file.id(), file.name.clone(), file.size);
                task.chunk_size = file.size;
                task.chunks = plan(file.size, file.size).into_iter().map(Chunk::from).collect();
                task.total_chunks = task.chunks.len();
                task
            })
            .collect();

        let mut accepted = Vec::new();
        for (index, file) in files.iter().enumerate() {
            let errors = validate_file(file, config);
            match detect_category(file) {
                Some(category) if errors.is_empty() => {
                    tasks[index].category = Some(category);
                    accepted.push((index, category));
                }
                _ => {
                    let errors = errors
                        .iter()
                        .map(|error| TaskError::validation(&file.name, error))
                        .collect();
                    fail_task(&mut tasks[index], errors);
                }
            }
        }

        for (category, members) in group_requests(&accepted, config, method) {
            for &index in &members {
                tasks[index].state = TaskState::Uploading;
                tasks[index].started_at = Some(Utc::now());
            }

            let parts: Vec<FileSource> = members.iter().map(|&index| files[index].clone()).collect();
            match self.send(method, category, &parts).await {
                Ok(response) => apply_response(&mut tasks, &members, response),
                Err(RetryError { attempts, error }) => {
                    warn!(?method, ?category, files = members.len(), attempts, %error, "batch upload failed");
                    for &index in &members {
                        let task_error = TaskError::batch(&tasks[index].file_name, attempts, error.to_string());
                        fail_task(&mut tasks[index], vec![task_error]);
                    }
                }
            }
        }

        let summary = BatchSummary::from_tasks(&tasks);
        if let Some(summary) = &summary {
            info!(
                ?method,
                total = summary.total,
                success = summary.success,
                failed = summary.failed,
                "batch upload finished"
            );
        }

        BatchJob {
            id: Uuid::new_v4(),
            method,
            tasks,
            summary,
        }
    }

    async fn send(
        &self,
        method: BatchMethod,
        category: Option<MediaCategory>,
        files: &[FileSource],
    ) -> Result<UploadResponse, RetryError> {
        let transport = &self.transport;

        self.retry
            .run(
                move |_| transport.upload_files(method, category, files),
                |_, _, _| {},
            )
            .await
    }
}

/// 按分类的 `maxFiles` 拆分请求，0 表示不限制
fn group_requests(
    accepted: &[(usize, MediaCategory)],
    config: &UploadConfigSet,
    method: BatchMethod,
) -> Vec<(Option<MediaCategory>, Vec<usize>)> {
    let mut requests = Vec::new();

    match method {
        BatchMethod::Multiple => {
            for category in MediaCategory::ALL {
                let members: Vec<usize> = accepted
                    .iter()
                    .filter(|(_, c)| *c == category)
                    .map(|(index, _)| *index)
                    .collect();
                if members.is_empty() {
                    continue;
                }

                let max_files = config.get(category).max_files;
                let size = if max_files == 0 { members.len() } else { max_files };
                for group in members.chunks(size) {
                    requests.push((Some(category), group.to_vec()));
                }
            }
        }
        BatchMethod::Smart => {
            // 混合分类的请求里每个分类都不能超过各自的上限
            let mut current = Vec::new();
            let mut counts: HashMap<MediaCategory, usize> = HashMap::new();

            for &(index, category) in accepted {
                let max_files = config.get(category).max_files;
                let count = counts.get(&category).copied().unwrap_or(0);
                if max_files > 0 && count >= max_files {
                    requests.push((None, std::mem::take(&mut current)));
                    counts.clear();
                }

                *counts.entry(category).or_default() += 1;
                current.push(index);
            }

            if !current.is_empty() {
                requests.push((None, current));
            }
        }
    }

    requests
}

/// 按文件名把服务端结果对应回任务
fn apply_response(tasks: &mut [UploadTask], members: &[usize], response: UploadResponse) {
    let UploadResponse {
        success,
        mut uploaded,
        errors,
        ..
    } = response;

    for &index in members {
        let task = &mut tasks[index];

        if let Some(position) = uploaded.iter().position(|file| file.original_name == task.file_name) {
            complete_task(task, uploaded.remove(position));
            continue;
        }

        let message = errors
            .iter()
            .find(|error| error.filename == task.file_name)
            .map(|error| error.error.clone())
            .unwrap_or_else(|| {
                if success {
                    "missing from server response".to_string()
                } else {
                    "rejected by server".to_string()
                }
            });
        let task_error = TaskError::batch(&task.file_name, 1, message);
        fail_task(task, vec![task_error]);
    }
}

fn complete_task(task: &mut UploadTask, file: StoredFile) {
    for chunk in task.chunks.iter_mut() {
        chunk.state = ChunkState::Uploaded;
    }
    task.stored_file = Some(file);
    task.state = TaskState::Completed;
    task.completed_at = Some(Utc::now());
}

fn fail_task(task: &mut UploadTask, errors: Vec<TaskError>) {
    task.errors.extend(errors);
    task.state = TaskState::Failed;
    task.completed_at = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::UploadConfig;

    fn config(image_max: usize, video_max: usize) -> UploadConfigSet {
        let category = |allowed: &[&str], max_files| UploadConfig {
            allowed_types: allowed.iter().map(|s| s.to_string()).collect(),
            max_size: 1024 * 1024,
            max_size_formatted: "1MB".to_string(),
            max_files,
            chunk_size: 1024,
            chunk_size_formatted: "1KB".to_string(),
            folder: String::new(),
        };

        UploadConfigSet {
            image: category(&[".jpg"], image_max),
            video: category(&[".mp4"], video_max),
        }
    }

    #[test]
    fn test_multiple_groups_by_category_and_limit() {
        use MediaCategory::*;
        let accepted = [(0, Image), (1, Video), (2, Image), (3, Image)];
        let requests = group_requests(&accepted, &config(2, 0), BatchMethod::Multiple);

        assert_eq!(
            requests,
            vec![
                (Some(Image), vec![0, 2]),
                (Some(Image), vec![3]),
                (Some(Video), vec![1]),
            ]
        );
    }

    #[test]
    fn test_smart_keeps_order_and_splits_on_limit() {
        use MediaCategory::*;
        let accepted = [(0, Image), (1, Video), (2, Video), (3, Image)];
        let requests = group_requests(&accepted, &config(0, 1), BatchMethod::Smart);

        assert_eq!(requests, vec![(None, vec![0, 1]), (None, vec![2, 3])]);
    }

    #[test]
    fn test_apply_response_matches_by_name() {
        let mut tasks: Vec<UploadTask> = ["a.jpg", "b.jpg", "c.jpg"]
            .iter()
            .map(|name| UploadTask::new(crate::core::FileId::new(name, 1, 0), name.to_string(), 1))
            .collect();

        let response: UploadResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "uploaded": [{ "originalName": "a.jpg", "savedName": "a-1.jpg", "size": 1 }],
            "errors": [{ "filename": "b.jpg", "error": "disk full" }]
        }))
        .unwrap();

        apply_response(&mut tasks, &[0, 1, 2], response);

        assert_eq!(tasks[0].state, TaskState::Completed);
        assert_eq!(tasks[0].stored_file.as_ref().unwrap().saved_name, "a-1.jpg");
        assert_eq!(tasks[1].state, TaskState::Failed);
        assert_eq!(tasks[1].errors[0].message, "disk full");
        assert_eq!(tasks[2].errors[0].message, "missing from server response");
    }
}
