// 配置管理模块
//
// 上传常量（分片大小、分片数上限、并发数、重试次数）是与控制面约定的
// 外部契约，统一放在这里作为配置默认值，不允许散落在调用点。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 默认分片大小: 1MB
pub const DEFAULT_PART_SIZE: u64 = 1024 * 1024;

/// 控制面允许的最大分片数
pub const MAX_PARTS: u64 = 10_000;

/// 全局最大并发传输分片数
pub const PARALLELISM: usize = 6;

/// 单分片最大尝试次数（首次尝试计入）
pub const MAX_RETRIES: u32 = 4;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 控制面基地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 目标分片大小（字节）
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    /// 全局最大并发传输分片数（所有上传会话共享）
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// 单分片最大尝试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_parallelism() -> usize {
    PARALLELISM
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            part_size: default_part_size(),
            parallelism: default_parallelism(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload: UploadConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;
        let config: Self = toml::from_str(&content).context("解析配置文件失败")?;
        Ok(config)
    }

    /// 加载配置，文件不存在时返回默认配置
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::load(path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("加载配置失败，使用默认配置: {}", e);
                Self::default()
            }
        }
    }

    /// 保存配置到 TOML 文件
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建配置目录失败: {:?}", parent))?;
        }
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_upload_config() {
        let config = UploadConfig::default();
        assert_eq!(config.part_size, 1024 * 1024);
        assert_eq!(config.parallelism, 6);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        // 只给出部分字段，其余取默认值
        let config: AppConfig = toml::from_str(
            r#"
            [upload]
            base_url = "https://uploads.example.com"
            parallelism = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.base_url, "https://uploads.example.com");
        assert_eq!(config.upload.parallelism, 2);
        assert_eq!(config.upload.part_size, DEFAULT_PART_SIZE);
        assert_eq!(config.upload.max_retries, MAX_RETRIES);
        assert!(config.log.enabled);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.upload.part_size = 8 * 1024 * 1024;
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.upload.part_size, 8 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_load_or_default_on_missing_file() {
        let config = AppConfig::load_or_default(Path::new("/nonexistent/config.toml")).await;
        assert_eq!(config.upload.parallelism, PARALLELISM);
    }
}
