// 控制面 HTTP 客户端实现
//
// JSON 控制面 API：
// - POST   {base}/api/uploads                 创建上传记录
// - POST   {base}/api/uploads/{id}/parts      签发分片目的地
// - POST   {base}/api/uploads/{id}/complete   完成上传
// - DELETE {base}/api/uploads/{id}            销毁上传记录
//
// 分片字节 PUT 到控制面签发的签名地址，请求体使用流式包装以便
// 在发送过程中回调进度。

use crate::config::UploadConfig;
use crate::control::types::{CompletedUpload, PartDestination, UploadRecord};
use crate::control::{ControlPlane, ProgressFn, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 流式请求体的分块大小: 64KB
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// 控制面 HTTP 客户端
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    /// HTTP客户端
    client: Client,
    /// 控制面基地址（无尾部斜杠）
    base_url: String,
}

impl HttpControlPlane {
    /// 创建新的控制面客户端
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// 从上传配置创建客户端
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create_upload(
        &self,
        file_name: &str,
        total_bytes: u64,
        multipart: bool,
    ) -> Result<UploadRecord> {
        debug!(
            "创建上传记录: file_name={}, total_bytes={}, multipart={}",
            file_name, total_bytes, multipart
        );

        let response = self
            .client
            .post(self.endpoint("/api/uploads"))
            .json(&json!({
                "fileName": file_name,
                "totalBytes": total_bytes,
                "multipart": multipart,
            }))
            .send()
            .await
            .context("创建上传记录请求失败")?
            .error_for_status()
            .context("控制面拒绝创建上传记录")?;

        let record: UploadRecord = response
            .json()
            .await
            .context("解析上传记录响应失败")?;

        debug!(
            "上传记录已创建: upload_id={}, key={}, 已落盘分片数={}",
            record.upload_id,
            record.object_key,
            record.existing_parts.len()
        );
        Ok(record)
    }

    async fn part_destination(
        &self,
        upload_id: &str,
        part_index: u32,
        byte_length: u64,
        checksum: &str,
    ) -> Result<PartDestination> {
        let response = self
            .client
            .post(self.endpoint(&format!("/api/uploads/{}/parts", upload_id)))
            .json(&json!({
                "partIndex": part_index,
                "byteLength": byte_length,
                "checksum": checksum,
            }))
            .send()
            .await
            .with_context(|| format!("签发分片 #{} 目的地请求失败", part_index))?
            .error_for_status()
            .with_context(|| format!("控制面拒绝签发分片 #{} 目的地", part_index))?;

        let dest: PartDestination = response
            .json()
            .await
            .context("解析分片目的地响应失败")?;
        Ok(dest)
    }

    async fn complete_upload(&self, upload_id: &str) -> Result<CompletedUpload> {
        debug!("完成上传: upload_id={}", upload_id);

        let response = self
            .client
            .post(self.endpoint(&format!("/api/uploads/{}/complete", upload_id)))
            .send()
            .await
            .context("完成上传请求失败")?
            .error_for_status()
            .context("控制面拒绝完成上传")?;

        let completed: CompletedUpload = response
            .json()
            .await
            .context("解析完成上传响应失败")?;
        Ok(completed)
    }

    async fn destroy_upload(&self, upload_id: &str) -> Result<()> {
        debug!("销毁上传记录: upload_id={}", upload_id);

        self.client
            .delete(self.endpoint(&format!("/api/uploads/{}", upload_id)))
            .send()
            .await
            .context("销毁上传记录请求失败")?
            .error_for_status()
            .context("控制面拒绝销毁上传记录")?;
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpControlPlane {
    async fn put(
        &self,
        dest: &PartDestination,
        body: Vec<u8>,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut headers = HeaderMap::new();
        for (name, value) in &dest.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("非法请求头名称: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("非法请求头值: {:?}", name))?;
            headers.insert(name, value);
        }

        let total = body.len() as u64;

        // 分块流式发送，每块被传输层取走时回调累计进度
        let chunks: Vec<Vec<u8>> = body
            .chunks(BODY_CHUNK_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();
        let mut sent: u64 = 0;
        let progress_cb = progress.clone();
        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            progress_cb(sent);
            Ok::<_, std::io::Error>(chunk)
        }));

        let request = self
            .client
            .put(&dest.url)
            .headers(headers)
            .header(reqwest::header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream))
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("传输被取消: url={}", dest.url);
                anyhow::bail!("传输已取消");
            }
            result = request => result.context("分片传输请求失败")?,
        };

        response
            .error_for_status()
            .context("存储端拒绝分片写入")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client =
            HttpControlPlane::new("http://127.0.0.1:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint("/api/uploads"),
            "http://127.0.0.1:8080/api/uploads"
        );
    }

    #[test]
    fn test_from_config() {
        let config = UploadConfig::default();
        let client = HttpControlPlane::from_config(&config).unwrap();
        assert_eq!(client.base_url, config.base_url);
    }
}
