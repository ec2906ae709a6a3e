// 上传编排器
//
// 驱动单个文件上传的完整生命周期：
//   Created -> RecordPending -> Planned -> Transferring -> Completing -> Done
// 任何非终态都可被中止进入 Aborted；创建/传输/完成阶段的致命错误进入
// Failed，并向通知接收器发出恰好一条用户可见消息。
//
// 并发约束由注入的闸门组保证：创建闸门（容量 1）串行化上传记录创建，
// 传输闸门限制所有会话合计的在途分片数。

use crate::config::UploadConfig;
use crate::control::{ControlPlane, Transport, UploadedObject};
use crate::error::UploadError;
use crate::gate::UploadGates;
use crate::notify::{NotificationSink, Severity};
use crate::uploader::part::{upload_part, PartUploadContext};
use crate::uploader::planner::{plan_parts, Part};
use crate::uploader::session::{ProgressEvent, SessionSnapshot, SessionState, UploadSession};
use anyhow::anyhow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// 文件上传编排器
///
/// 一个实例对应一次逻辑上传。`start` 只能调用一次；`abort` 可从任意
/// 任务随时调用，且幂等。
pub struct FileUploader {
    session: Arc<UploadSession>,
    control: Arc<dyn ControlPlane>,
    transport: Arc<dyn Transport>,
    gates: UploadGates,
    sink: Arc<dyn NotificationSink>,
    file_path: PathBuf,
    part_size: u64,
    max_retries: u32,
    /// 上传记录至多销毁一次
    destroyed: AtomicBool,
}

impl FileUploader {
    /// 创建编排器
    ///
    /// # 参数
    /// * `file_path` - 本地文件路径
    /// * `file_name` - 上传到服务端的文件名（可与本地路径不同）
    /// * `total_bytes` - 文件总大小
    /// * `control` - 控制面接口
    /// * `transport` - 字节传输层
    /// * `gates` - 进程级准入闸门组（所有会话共享）
    /// * `sink` - 终态失败的用户通知接收器
    /// * `config` - 上传配置
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        total_bytes: u64,
        control: Arc<dyn ControlPlane>,
        transport: Arc<dyn Transport>,
        gates: UploadGates,
        sink: Arc<dyn NotificationSink>,
        config: &UploadConfig,
    ) -> Self {
        let multipart = plan_parts(total_bytes, config.part_size).len() > 1;
        Self {
            session: Arc::new(UploadSession::new(file_name, total_bytes, multipart)),
            control,
            transport,
            gates,
            sink,
            file_path: file_path.into(),
            part_size: config.part_size,
            max_retries: config.max_retries,
            destroyed: AtomicBool::new(false),
        }
    }

    // =====================================================
    // 对外观测
    // =====================================================

    /// 当前状态
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// 完成百分比 [0, 100]
    pub fn percent_done(&self) -> u8 {
        self.session.percent_done()
    }

    /// 订阅进度事件流
    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressEvent> {
        self.session.subscribe()
    }

    /// 会话快照
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    // =====================================================
    // 生命周期
    // =====================================================

    /// 启动上传并驱动到终态
    ///
    /// 成功返回已上传对象描述；中止返回 `Aborted`（静默）；其余错误
    /// 在返回前已向通知接收器发出恰好一条消息。
    pub async fn start(&self) -> Result<UploadedObject, UploadError> {
        if self.session.state() != SessionState::Created {
            return Err(UploadError::CreateFailed(anyhow!("会话已启动，不可重复启动")));
        }

        match self.run().await {
            Ok(object) => {
                self.session.transition(SessionState::Done);
                info!(
                    "上传完成: 会话={}, key={}, url={}",
                    self.session.id, object.key, object.url
                );
                Ok(object)
            }
            Err(err) if err.is_aborted() => {
                // 中止静默结算，不通知
                self.session.set_aborted();
                self.session.zero_all_progress();
                self.session.transition(SessionState::Aborted);
                debug!("上传已中止: 会话={}", self.session.id);
                Err(err)
            }
            Err(err) => {
                self.session.transition(SessionState::Failed);
                self.notify_failure(&err);
                Err(err)
            }
        }
    }

    /// 中止上传（幂等）
    ///
    /// 取消所有在途分片、清零进度，并至多销毁一次服务端上传记录。
    /// 已完成（Done）的上传不受影响。
    pub async fn abort(&self) {
        if self.session.state() == SessionState::Done {
            return;
        }

        let first = self.session.set_aborted();
        self.session.cancel_token().cancel();
        if first {
            info!("中止上传: 会话={}", self.session.id);
            self.session.zero_all_progress();
            self.session.transition(SessionState::Aborted);
        }

        self.destroy_record_once().await;
    }

    // =====================================================
    // 内部流水线
    // =====================================================

    async fn run(&self) -> Result<UploadedObject, UploadError> {
        let cancel = self.session.cancel_token();

        // 阶段 1：创建上传记录（创建闸门串行化，排队顺序即创建顺序）
        self.session.transition(SessionState::RecordPending);
        let record = {
            let _token = tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Aborted),
                token = self.gates.creation.acquire() => token,
            };
            if self.session.is_aborted() {
                return Err(UploadError::Aborted);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Aborted),
                result = self.control.create_upload(
                    &self.session.file_name,
                    self.session.total_bytes,
                    self.session.multipart,
                ) => result.map_err(UploadError::CreateFailed)?,
            }
        };
        self.session.set_record(record.clone());

        // 创建请求在途时可能已被中止，此时记录是孤儿，立即销毁
        if self.session.is_aborted() {
            self.destroy_record_once().await;
            return Err(UploadError::Aborted);
        }

        // 阶段 2：规划分片，预置已落盘分片（断点续传）
        let parts = plan_parts(self.session.total_bytes, self.part_size);
        self.session.transition(SessionState::Planned);

        let mut pending = Vec::new();
        for part in parts {
            match record.existing_parts.get(&part.index) {
                Some(existing) if existing.size == part.len() => {
                    debug!("分片 #{} 已落盘（{} 字节），跳过", part.index, existing.size);
                    self.session.seed_completed_part(part.index, part.len());
                }
                _ => pending.push(part),
            }
        }
        info!(
            "会话 {} 规划完成: 待传 {} 片, 已落盘跳过 {} 片",
            self.session.id,
            pending.len(),
            record.existing_parts.len()
        );

        // 阶段 3：并发传输
        // 单次上传地址只对非分片记录有效；分片记录必须逐片签发目的地
        let single_shot_url = if self.session.multipart {
            None
        } else {
            record.single_shot_upload_url.clone()
        };
        self.session.transition(SessionState::Transferring);
        if !pending.is_empty() {
            self.transfer_parts(pending, single_shot_url).await?;
        }

        // 阶段 4：完成
        if self.session.is_aborted() {
            return Err(UploadError::Aborted);
        }

        // 非分片上传不经过完成接口，创建响应即最终对象描述
        if !self.session.multipart {
            return Ok(UploadedObject {
                key: record.object_key,
                url: record.final_url,
                id: record.upload_id,
            });
        }

        self.session.transition(SessionState::Completing);
        let completed = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Aborted),
            result = self.control.complete_upload(&record.upload_id) => {
                result.map_err(UploadError::CompletionFailed)?
            }
        };

        Ok(completed.into())
    }

    /// 并发上传待传分片，首个永久失败会取消其余在途分片
    async fn transfer_parts(
        &self,
        parts: Vec<Part>,
        single_shot_url: Option<String>,
    ) -> Result<(), UploadError> {
        let ctx = Arc::new(PartUploadContext {
            session: self.session.clone(),
            control: self.control.clone(),
            transport: self.transport.clone(),
            file_path: self.file_path.clone(),
            max_retries: self.max_retries,
            single_shot_url,
        });

        let mut join_set = JoinSet::new();
        let mut task_parts: HashMap<tokio::task::Id, u32> = HashMap::new();
        for part in parts {
            let ctx = ctx.clone();
            let gate = self.gates.transfer.clone();
            let cancel = self.session.register_in_flight(part.index);
            let index = part.index;
            let handle = join_set.spawn(async move {
                let result = async {
                    // 先过传输闸门，排队期间也要响应取消
                    let _token = tokio::select! {
                        _ = cancel.cancelled() => return Err(UploadError::Aborted),
                        token = gate.acquire() => token,
                    };
                    upload_part(&ctx, &part, &cancel).await
                }
                .await;
                ctx.session.release_in_flight(part.index);
                result
            });
            task_parts.insert(handle.id(), index);
        }

        let mut first_error: Option<UploadError> = None;
        while let Some(joined) = join_set.join_next_with_id().await {
            let result = match joined {
                Ok((_, result)) => result,
                // 异常退出的任务按登记的任务 ID 找回分片索引
                Err(e) => {
                    let index = task_parts.get(&e.id()).copied().unwrap_or(0);
                    Err(UploadError::PartTransferFailed {
                        index,
                        attempts: 0,
                        source: anyhow!("分片 #{} 任务异常退出: {}", index, e),
                    })
                }
            };

            if let Err(err) = result {
                if first_error.is_none() {
                    if !err.is_aborted() {
                        warn!("会话 {} 首个永久失败: {}, 取消其余在途分片", self.session.id, err);
                        self.session.cancel_in_flight();
                    }
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 至多调用一次 destroy_upload；记录尚未创建时不消耗机会
    async fn destroy_record_once(&self) {
        let Some(upload_id) = self.session.upload_id() else {
            return;
        };
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Err(e) = self.control.destroy_upload(&upload_id).await {
            warn!("销毁上传记录失败: upload_id={}, 错误: {}", upload_id, e);
        }
    }

    /// 终态失败恰好通知一次，消息形如 "Failed to <phase>: <error>"
    fn notify_failure(&self, err: &UploadError) {
        let message = match err {
            UploadError::CreateFailed(source) => {
                format!("Failed to create upload: {}", source)
            }
            UploadError::ChecksumFailed { index, source } => {
                format!("Failed to checksum part {}: {}", index, source)
            }
            UploadError::PartTransferFailed { index, source, .. } => {
                format!("Failed to transfer part {}: {}", index, source)
            }
            UploadError::CompletionFailed(source) => {
                format!("Failed to complete upload: {}", source)
            }
            UploadError::Aborted => return,
        };
        warn!("会话 {} 失败: {}", self.session.id, message);
        self.sink.notify(&message, Severity::Error);
    }
}
