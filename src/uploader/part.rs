// 单分片上传
//
// 每个分片一次独立的重试循环：读取字节并计算校验和、向控制面申请
// 签名目的地、PUT 到存储端。任何一步失败都将该分片进度清零、指数
// 退避后重试；连续失败达到上限则判定为永久失败。
//
// 退避公式：1000ms * 2^连续失败次数（2s / 4s / 8s）。

use crate::control::{ControlPlane, ProgressFn, Transport};
use crate::error::UploadError;
use crate::uploader::planner::Part;
use crate::uploader::session::UploadSession;
use anyhow::{anyhow, Context, Result};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 分片上传上下文（会话内所有分片共享）
pub(crate) struct PartUploadContext {
    pub session: Arc<UploadSession>,
    pub control: Arc<dyn ControlPlane>,
    pub transport: Arc<dyn Transport>,
    pub file_path: PathBuf,
    pub max_retries: u32,
    /// 非分片上传时控制面直接签发的 PUT 地址，存在时跳过逐片签发
    pub single_shot_url: Option<String>,
}

/// 尝试失败的阶段分类
enum AttemptError {
    /// 读取或校验和计算失败
    Checksum(anyhow::Error),
    /// 签发目的地或字节传输失败
    Transfer(anyhow::Error),
}

/// 计算指数退避时长
fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_millis(1000u64 * (1u64 << retry_count))
}

/// 上传单个分片（含重试循环）
///
/// 成功时分片进度置满并清除重试计数；中止时返回 `Aborted`；
/// 连续失败达到 `max_retries` 时返回对应的永久错误。
pub(crate) async fn upload_part(
    ctx: &PartUploadContext,
    part: &Part,
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    loop {
        if ctx.session.is_aborted() || cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        match attempt_part(ctx, part, cancel).await {
            Ok(()) => {
                ctx.session.mark_part_complete(part);
                debug!("分片 #{} 上传成功, {} 字节", part.index, part.len());
                return Ok(());
            }
            Err(err) => {
                // 失败即清零该分片进度，保证观测到的进度不回退再前进
                ctx.session.reset_part_progress(part.index);

                if ctx.session.is_aborted() || cancel.is_cancelled() {
                    return Err(UploadError::Aborted);
                }

                let count = ctx.session.bump_retry(part.index);
                if count >= ctx.max_retries {
                    warn!("分片 #{} 连续失败 {} 次，放弃", part.index, count);
                    return Err(match err {
                        AttemptError::Checksum(source) => UploadError::ChecksumFailed {
                            index: part.index,
                            source,
                        },
                        AttemptError::Transfer(source) => UploadError::PartTransferFailed {
                            index: part.index,
                            attempts: count,
                            source,
                        },
                    });
                }

                let delay = backoff_delay(count);
                warn!(
                    "分片 #{} 第 {} 次失败，{}ms 后重试",
                    part.index,
                    count,
                    delay.as_millis()
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(UploadError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// 单次上传尝试
async fn attempt_part(
    ctx: &PartUploadContext,
    part: &Part,
    cancel: &CancellationToken,
) -> Result<(), AttemptError> {
    // 读取分片字节并计算 MD5（阻塞 I/O 放到专用线程）
    let (body, checksum) = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(AttemptError::Transfer(anyhow!("传输已取消")));
        }
        result = read_and_digest(&ctx.file_path, part) => {
            result.map_err(AttemptError::Checksum)?
        }
    };

    // 申请本次尝试的签名目的地；单次上传地址无需逐片签发
    let dest = match &ctx.single_shot_url {
        Some(url) => crate::control::PartDestination::bare(url.clone()),
        None => {
            let upload_id = ctx
                .session
                .upload_id()
                .ok_or_else(|| AttemptError::Transfer(anyhow!("上传记录尚未创建")))?;
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AttemptError::Transfer(anyhow!("传输已取消")));
                }
                result = ctx.control.part_destination(&upload_id, part.index, part.len(), &checksum) => {
                    result.map_err(AttemptError::Transfer)?
                }
            }
        }
    };

    // 传输过程中按累计字节数回写会话进度
    let session = ctx.session.clone();
    let index = part.index;
    let progress: ProgressFn = Arc::new(move |bytes| session.record_progress(index, bytes));

    ctx.transport
        .put(&dest, body, progress, cancel)
        .await
        .map_err(AttemptError::Transfer)
}

/// 读取分片字节并计算十六进制 MD5
async fn read_and_digest(path: &Path, part: &Part) -> Result<(Vec<u8>, String)> {
    let path = path.to_path_buf();
    let start = part.start;
    let len = part.len() as usize;

    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("打开文件失败: {:?}", path))?;
        file.seek(SeekFrom::Start(start))
            .with_context(|| format!("定位到偏移 {} 失败", start))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)
            .with_context(|| format!("读取 {} 字节失败", len))?;

        let mut md5_ctx = md5::Context::new();
        md5_ctx.consume(&buffer);
        let checksum = hex::encode(md5_ctx.compute().0);
        Ok((buffer, checksum))
    })
    .await
    .context("校验和计算任务异常退出")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(3), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_read_and_digest_slice() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let part = Part::new(2, 3..7);
        let (body, checksum) = read_and_digest(file.path(), &part).await.unwrap();
        assert_eq!(body, b"3456");
        // md5("3456")
        assert_eq!(checksum, "def7924e3199be5e18060bb3e1d547a7");
    }

    #[tokio::test]
    async fn test_read_and_digest_empty_part() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let part = Part::new(1, 0..0);
        let (body, checksum) = read_and_digest(file.path(), &part).await.unwrap();
        assert!(body.is_empty());
        // md5("")
        assert_eq!(checksum, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        let part = Part::new(1, 0..100);
        assert!(read_and_digest(file.path(), &part).await.is_err());
    }
}
