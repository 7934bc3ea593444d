use std::time::Duration;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;
use crate::config::Config;
use crate::core::{
    BatchMethod, ChunkRequest, ChunkUploadResponse, DiskInfo, FileSource, MediaCategory,
    MergeChunksResponse, MergeRequest, Result, ServerProgress, SourceData, TransferError,
    Transport, UploadConfigSet, UploadResponse,
};

/// 基于 reqwest 的服务端接口实现
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(300))
    }

    /// `timeout` 作用于每个 HTTP 请求，分片另有调度器的单次超时
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self> {
        // 提前校验地址
        Url::parse(endpoint)?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Self::with_timeout(&config.endpoint, config.request_timeout())?;
        Ok(match &config.token {
            Some(token) => transport.with_token(token),
            None => transport,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransferError::server_error(status.as_u16(), message));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn file_part(file: &FileSource) -> Result<Part> {
        let part = match file.data() {
            SourceData::Path(path) => {
                let reader = File::open(path).await?;
                Part::stream_with_length(Body::wrap_stream(ReaderStream::new(reader)), file.size)
            }
            SourceData::Memory(bytes) => Part::stream_with_length(Body::from(bytes.clone()), file.size),
        };

        let part = part.file_name(file.name.clone());
        Ok(match &file.mime_type {
            Some(mime_type) => part.mime_str(mime_type)?,
            None => part,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_config(&self) -> Result<UploadConfigSet> {
        let response = self.authorize(self.client.get(self.url("/api/config"))).send().await?;
        let config: UploadConfigSet = Self::parse_json(response).await?;
        Ok(config.normalized())
    }

    async fn disk_info(&self) -> Result<DiskInfo> {
        let response = self.authorize(self.client.get(self.url("/api/disk-info"))).send().await?;
        Self::parse_json(response).await
    }

    async fn upload_chunk(&self, request: ChunkRequest) -> Result<ChunkUploadResponse> {
        debug!(
            file_name = %request.file_name,
            chunk_index = request.chunk_index,
            total_chunks = request.total_chunks,
            bytes = request.data.len(),
            "uploading chunk"
        );

        let length = request.data.len() as u64;
        let chunk = Part::stream_with_length(Body::from(request.data), length)
            .file_name(request.file_name.clone());

        let form = Form::new()
            .text("fileType", request.category.as_str())
            .text("fileName", request.file_name)
            .text("chunkIndex", request.chunk_index.to_string())
            .text("totalChunks", request.total_chunks.to_string())
            .text("fileSize", request.file_size.to_string())
            .part("chunk", chunk);

        let response = self
            .authorize(self.client.post(self.url("/api/chunk-upload")))
            .multipart(form)
            .send()
            .await?;

        Self::parse_json(response).await
    }

    async fn merge_chunks(&self, request: &MergeRequest) -> Result<MergeChunksResponse> {
        let response = self
            .authorize(self.client.post(self.url("/api/merge-chunks")))
            .json(request)
            .send()
            .await?;

        Self::parse_json(response).await
    }

    async fn upload_progress(&self, file_name: &str) -> Result<ServerProgress> {
        let mut url = Url::parse(&self.url("/api/upload-progress"))?;
        url.path_segments_mut()
            .map_err(|_| TransferError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .push(file_name);

        let response = self.authorize(self.client.get(url)).send().await?;
        Self::parse_json(response).await
    }

    async fn upload_files(
        &self,
        method: BatchMethod,
        category: Option<MediaCategory>,
        files: &[FileSource],
    ) -> Result<UploadResponse> {
        let path = match method {
            BatchMethod::Multiple => "/api/multiple-upload",
            BatchMethod::Smart => "/api/smart-upload",
        };

        let mut form = Form::new();
        if let Some(category) = category {
            form = form.text("fileType", category.as_str());
        } else if method == BatchMethod::Multiple {
            return Err(TransferError::InvalidState(
                "multiple-upload requires a media category".to_string(),
            ));
        }

        for file in files {
            form = form.part("files", Self::file_part(file).await?);
        }

        debug!(?method, ?category, files = files.len(), "uploading whole files");

        let response = self
            .authorize(self.client.post(self.url(path)))
            .multipart(form)
            .send()
            .await?;

        Self::parse_json(response).await
    }
}
