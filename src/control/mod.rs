// 控制面接口模块
//
// 引擎通过两个窄接口与外部协作：
// - ControlPlane：创建/描述/完成/销毁上传记录，签发分片目的地
// - Transport：向签名地址 PUT 字节，带进度回调与取消
//
// 两者都是 trait，HTTP 实现见 http.rs，测试用内存实现替换。

pub mod http;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use http::HttpControlPlane;
pub use types::{CompletedUpload, ExistingPart, PartDestination, UploadRecord, UploadedObject};

/// 传输进度回调：参数为当前尝试内已发送的累计字节数（单调递增）
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// 控制面 API
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// 创建上传记录；恢复已中断的会话时响应会带有已落盘分片
    async fn create_upload(
        &self,
        file_name: &str,
        total_bytes: u64,
        multipart: bool,
    ) -> Result<UploadRecord>;

    /// 为指定分片签发上传目的地
    async fn part_destination(
        &self,
        upload_id: &str,
        part_index: u32,
        byte_length: u64,
        checksum: &str,
    ) -> Result<PartDestination>;

    /// 完成上传（所有分片成功后调用一次）
    async fn complete_upload(&self, upload_id: &str) -> Result<CompletedUpload>;

    /// 销毁上传记录，释放服务端资源
    async fn destroy_upload(&self, upload_id: &str) -> Result<()>;
}

/// 字节传输层
#[async_trait]
pub trait Transport: Send + Sync {
    /// PUT 字节到签名目的地
    ///
    /// progress 在字节被传输层接受时以累计值回调；取消令牌触发时
    /// 必须立即中止传输并返回错误，而不是等待自然超时。
    async fn put(
        &self,
        dest: &PartDestination,
        body: Vec<u8>,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
