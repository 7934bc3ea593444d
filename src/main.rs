use std::sync::Arc;
use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use media_tunnel::config::Config;
use media_tunnel::{
    format_bytes, FileSource, HttpTransport, ProgressAggregator, UploadEvent, UploadManager,
    UploadRoute,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&path)?;

    let transport = Arc::new(HttpTransport::from_config(&config)?);
    let manager = UploadManager::builder()
        .transport(transport)
        .options(config.scheduler.clone())
        .build()?;

    if let Ok(disk) = manager.disk_info().await {
        info!(image_free = %disk.image.free_formatted, video_free = %disk.video.free_formatted, "disk info");
    }

    // 进度输出
    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        let mut aggregator = ProgressAggregator::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    aggregator.apply(&event);
                    if let UploadEvent::ChunkStateChanged { progress, .. } = &event {
                        let overall = aggregator.overall();
                        println!(
                            "{}: {}/{} chunks ({}%), overall {}%",
                            progress.file_name,
                            progress.uploaded_chunks,
                            progress.total_chunks,
                            progress.percentage,
                            overall.percentage
                        );
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut handles = Vec::new();
    for file_path in &config.files {
        let source = FileSource::from_path(file_path)
            .await
            .with_context(|| format!("Can't open {}", file_path.display()))?;

        match manager.upload(source).await {
            Ok(UploadRoute::Chunked(handle)) => handles.push(handle),
            Ok(UploadRoute::Batch(job)) => {
                for task in &job.tasks {
                    match &task.stored_file {
                        Some(file) => println!("{}: uploaded as {}", task.file_name, file.saved_name),
                        None => {
                            for task_error in &task.errors {
                                error!("{}", task_error);
                            }
                        }
                    }
                }
            }
            Err(err) => error!(file = %file_path.display(), "{}", err),
        }
    }

    for handle in handles {
        match handle.wait().await {
            Ok(file) => println!(
                "{}: merged as {} ({})",
                file.original_name,
                file.saved_name,
                format_bytes(file.size)
            ),
            Err(err) => error!("{}", err),
        }
    }

    let tasks = manager.tasks().await?;
    let completed = tasks.iter().filter(|task| task.stored_file.is_some()).count();
    info!(total = tasks.len(), completed, "all chunked uploads finished");

    manager.shutdown().await?;
    printer.abort();

    Ok(())
}
