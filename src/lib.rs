// Object Store Uploader Library
// 可续传分片上传引擎核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 错误分类模块
pub mod error;

// 准入控制模块
pub mod gate;

// 用户通知模块
pub mod notify;

// 控制面接口模块
pub mod control;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, LogConfig, UploadConfig};
pub use control::{
    CompletedUpload, ControlPlane, ExistingPart, HttpControlPlane, PartDestination, ProgressFn,
    Transport, UploadRecord, UploadedObject,
};
pub use error::UploadError;
pub use gate::{AdmissionGate, GateToken, UploadGates};
pub use notify::{NotificationSink, Severity, TracingSink};
pub use uploader::{
    plan_parts, part_size_for, FileUploader, Part, ProgressEvent, SessionSnapshot, SessionState,
    UploadSession,
};
