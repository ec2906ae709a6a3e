// 上传引擎模块
//
// - planner: 分片规划（纯函数）
// - session: 会话状态（进度/重试/在途/状态机）
// - part: 单分片重试循环
// - orchestrator: 生命周期编排

pub mod orchestrator;
pub mod part;
pub mod planner;
pub mod session;

pub use orchestrator::FileUploader;
pub use planner::{plan_parts, part_size_for, Part};
pub use session::{ProgressEvent, SessionSnapshot, SessionState, UploadSession};
