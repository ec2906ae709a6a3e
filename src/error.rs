// 上传错误分类
//
// 阶段错误（创建/校验和/分片传输/完成）必须能被调用方以变体形式区分，
// 而不是解析消息字符串。Aborted 不算失败，不触发任何通知。

use thiserror::Error;

/// 上传引擎错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 控制面拒绝创建上传记录（致命，不重试）
    #[error("control plane rejected upload creation: {0}")]
    CreateFailed(#[source] anyhow::Error),

    /// 分片校验和计算失败（按分片重试路径处理，耗尽后致命）
    #[error("checksum computation failed for part #{index}: {source}")]
    ChecksumFailed {
        index: u32,
        #[source]
        source: anyhow::Error,
    },

    /// 分片传输失败（重试耗尽后致命）
    #[error("part #{index} failed after {attempts} attempts: {source}")]
    PartTransferFailed {
        index: u32,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// 控制面拒绝完成调用（致命；分片字节已在服务端落盘）
    #[error("control plane rejected upload completion: {0}")]
    CompletionFailed(#[source] anyhow::Error),

    /// 调用方主动中止（静默结算，不触发通知）
    #[error("upload aborted")]
    Aborted,
}

impl UploadError {
    /// 是否为调用方中止
    pub fn is_aborted(&self) -> bool {
        matches!(self, UploadError::Aborted)
    }

    /// 失败分片索引（仅分片阶段错误携带）
    pub fn part_index(&self) -> Option<u32> {
        match self {
            UploadError::ChecksumFailed { index, .. } => Some(*index),
            UploadError::PartTransferFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}
