use async_trait::async_trait;
use super::errors::Result;
use super::source::FileSource;
use super::types::{
    BatchMethod, ChunkRequest, ChunkUploadResponse, DiskInfo, MediaCategory, MergeChunksResponse,
    MergeRequest, ServerProgress, UploadConfigSet, UploadResponse,
};

/// 服务端接口抽象 - 调度器和批量上传只依赖此 trait
#[async_trait]
pub trait Transport: Send + Sync {
    /// 获取各分类的上传限制
    async fn fetch_config(&self) -> Result<UploadConfigSet>;

    /// 获取磁盘空间信息
    async fn disk_info(&self) -> Result<DiskInfo>;

    /// 上传单个分片
    async fn upload_chunk(&self, request: ChunkRequest) -> Result<ChunkUploadResponse>;

    /// 请求服务端合并分片
    async fn merge_chunks(&self, request: &MergeRequest) -> Result<MergeChunksResponse>;

    /// 查询服务端已收到的分片数
    async fn upload_progress(&self, file_name: &str) -> Result<ServerProgress>;

    /// 整文件上传，`Multiple` 需要指定分类
    async fn upload_files(
        &self,
        method: BatchMethod,
        category: Option<MediaCategory>,
        files: &[FileSource],
    ) -> Result<UploadResponse>;
}
