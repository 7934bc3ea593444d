use super::types::{
    FileId, MediaCategory, MergeChunksResponse, TaskId, TaskState, UploadConfigSet, UploadTask,
};
use super::errors::{ErrorKind, TaskError, TransferError};

#[test]
fn test_task_state_transition() {
    use TaskState::*;

    // valid
    assert!(Validating.can_transition_to(Chunking));
    assert!(Validating.can_transition_to(Uploading));
    assert!(Chunking.can_transition_to(Uploading));
    assert!(Uploading.can_transition_to(Merging));
    assert!(Merging.can_transition_to(Completed));
    assert!(Uploading.can_transition_to(Cancelled));
    assert!(Merging.can_transition_to(Failed));
    assert!(Failed.can_transition_to(Merging));

    // invalid
    assert!(!Completed.can_transition_to(Uploading));
    assert!(!Completed.can_transition_to(Failed));
    assert!(!Cancelled.can_transition_to(Uploading));
    assert!(!Cancelled.can_transition_to(Merging));
    assert!(!Failed.can_transition_to(Uploading));
    assert!(!Chunking.can_transition_to(Merging));
}

#[test]
fn test_task_id_generation() {
    let id1 = TaskId::new();
    let id2 = TaskId::new();

    assert_ne!(id1, id2);
    assert_eq!(id1, id1);
    assert!(!id1.to_string().is_empty());
}

#[test]
fn test_file_id_is_stable() {
    let a = FileId::new("clip.mp4", 1024, 1_700_000_000_000);
    let b = FileId::new("clip.mp4", 1024, 1_700_000_000_000);

    assert_eq!(a, b);
    assert_eq!(a.to_string(), "clip.mp4_1024_1700000000000");
    assert_ne!(a, FileId::new("clip.mp4", 1025, 1_700_000_000_000));
}

#[test]
fn test_config_parses_overflowed_limits() {
    let json = r#"{
        "image": {
            "allowedTypes": ["JPG", ".png"],
            "maxSize": 10485760,
            "maxSizeFormatted": "10MB",
            "maxFiles": 20,
            "chunkSize": 2097152,
            "chunkSizeFormatted": "2MB",
            "folder": "images"
        },
        "video": {
            "allowedTypes": [".mp4"],
            "maxSize": "-2147483648",
            "maxSizeFormatted": "2GB",
            "maxFiles": 5
        }
    }"#;

    let config: UploadConfigSet = serde_json::from_str::<UploadConfigSet>(json).unwrap().normalized();

    assert_eq!(config.image.allowed_types, vec![".jpg", ".png"]);
    assert_eq!(config.get(MediaCategory::Video).max_size, -2147483648);
    assert_eq!(config.video.chunk_size, 0);
    assert_eq!(config.video.max_files, 5);
}

#[test]
fn test_merge_response_flattens_file() {
    let json = r#"{
        "success": true,
        "message": "merged",
        "originalName": "clip.mp4",
        "savedName": "1700000000-clip.mp4",
        "size": 10000000,
        "chunks": 5
    }"#;

    let response: MergeChunksResponse = serde_json::from_str(json).unwrap();
    assert!(response.success);
    assert_eq!(response.file.saved_name, "1700000000-clip.mp4");
    assert_eq!(response.file.chunks, Some(5));
}

#[test]
fn test_task_error_messages() {
    let chunk = TaskError::chunk(
        "clip.mp4",
        4,
        3,
        &TransferError::server_error(503, "unavailable"),
    );
    assert_eq!(chunk.kind, ErrorKind::ChunkUpload);
    assert_eq!(
        chunk.to_string(),
        "clip.mp4: chunk 4 failed after 3 attempts: Server error: status code 503, message: unavailable"
    );

    let merge = TaskError::merge("clip.mp4", 2, &TransferError::rejected("merge", "missing chunk"));
    assert_eq!(
        merge.to_string(),
        "clip.mp4: merge failed: Server rejected merge: missing chunk after 2 attempts"
    );

    let task = TransferError::Task {
        kind: ErrorKind::ChunkUpload,
        errors: vec![chunk],
    };
    assert_eq!(task.kind(), Some(ErrorKind::ChunkUpload));
    assert!(!task.is_retryable());
}

#[test]
fn test_new_task_starts_validating() {
    let task = UploadTask::new(FileId::new("a.jpg", 1, 0), "a.jpg".to_string(), 1);
    assert_eq!(task.state, TaskState::Validating);
    assert_eq!(task.uploaded_chunks(), 0);
    assert!(!task.all_chunks_uploaded());
    assert_eq!(task.failure_kind(), None);
}
