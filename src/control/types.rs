// 控制面接口类型定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务端已落盘的分片元信息
///
/// 控制面在同一逻辑上传被中断后重建会话时返回，是断点续传的契约：
/// 索引与字节长度都匹配的计划分片视为已持久化，不再重传。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingPart {
    /// 服务端返回的实体标签
    pub etag: String,
    /// 分片字节长度
    pub size: u64,
}

/// 上传记录（create_upload 返回的服务端会话标识）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// 上传会话 ID
    pub upload_id: String,
    /// 目标对象键
    pub object_key: String,
    /// 完成后的对象访问地址
    pub final_url: String,
    /// 单次上传地址（仅非分片上传时返回）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_shot_upload_url: Option<String>,
    /// 已落盘分片（分片索引 -> 元信息）
    #[serde(default)]
    pub existing_parts: HashMap<u32, ExistingPart>,
}

/// 单个分片的签名上传目的地
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartDestination {
    /// 签名 PUT 地址
    pub url: String,
    /// 传输时必须携带的请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl PartDestination {
    /// 仅含地址、无额外请求头的目的地
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }
}

/// complete_upload 的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    /// 对象键
    pub object_key: String,
    /// 对象访问地址
    pub final_url: String,
    /// 上传会话 ID
    pub upload_id: String,
}

/// 上传成功后交还给调用方的对象描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    /// 对象键
    pub key: String,
    /// 对象访问地址
    pub url: String,
    /// 上传会话 ID
    pub id: String,
}

impl From<CompletedUpload> for UploadedObject {
    fn from(completed: CompletedUpload) -> Self {
        Self {
            key: completed.object_key,
            url: completed.final_url,
            id: completed.upload_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_record_deserializes_existing_parts() {
        let json = r#"{
            "uploadId": "u-123",
            "objectKey": "objects/a.bin",
            "finalUrl": "https://store.example.com/objects/a.bin",
            "existingParts": {
                "1": { "etag": "e1", "size": 1048576 },
                "3": { "etag": "e3", "size": 512 }
            }
        }"#;

        let record: UploadRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.upload_id, "u-123");
        assert!(record.single_shot_upload_url.is_none());
        assert_eq!(record.existing_parts.len(), 2);
        assert_eq!(record.existing_parts[&1].size, 1048576);
        assert_eq!(record.existing_parts[&3].etag, "e3");
    }

    #[test]
    fn test_upload_record_defaults_empty_existing_parts() {
        let json = r#"{
            "uploadId": "u-1",
            "objectKey": "k",
            "finalUrl": "https://store.example.com/k",
            "singleShotUploadUrl": "https://store.example.com/put/k"
        }"#;

        let record: UploadRecord = serde_json::from_str(json).unwrap();
        assert!(record.existing_parts.is_empty());
        assert!(record.single_shot_upload_url.is_some());
    }

    #[test]
    fn test_uploaded_object_from_completed() {
        let completed = CompletedUpload {
            object_key: "k".to_string(),
            final_url: "https://store.example.com/k".to_string(),
            upload_id: "u-9".to_string(),
        };
        let object = UploadedObject::from(completed);
        assert_eq!(object.key, "k");
        assert_eq!(object.id, "u-9");
    }
}
