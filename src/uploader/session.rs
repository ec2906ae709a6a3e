// 上传会话状态
//
// 一个会话由且仅由一个 FileUploader 实例拥有。进度表、重试表和在途
// 句柄表全部收拢在会话内部，所有变更都经过会话自己的锁，外部不可见
// 可变状态——异步回调与中止请求可能竞争，检查 aborted 标志与表变更
// 必须在同一把锁下完成。

use crate::control::UploadRecord;
use crate::uploader::planner::Part;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// 会话状态机
///
/// Aborted 可从任何非终态进入；Failed 可从 RecordPending、
/// Transferring、Completing 进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// 已创建，尚未启动
    Created,
    /// 正在创建上传记录
    RecordPending,
    /// 分片已规划
    Planned,
    /// 分片传输中
    Transferring,
    /// 正在调用完成接口
    Completing,
    /// 已完成
    Done,
    /// 已中止
    Aborted,
    /// 已失败
    Failed,
}

impl SessionState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Aborted | SessionState::Failed
        )
    }
}

/// 进度事件（推送给订阅者）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 完成百分比 [0, 100]
    pub percent_done: u8,
}

/// 会话快照（对外观测用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// 会话 ID（客户端本地生成，仅用于日志追踪）
    pub id: String,
    /// 目标文件名
    pub file_name: String,
    /// 文件总大小
    pub total_bytes: u64,
    /// 是否分片上传
    pub multipart: bool,
    /// 当前状态
    pub state: SessionState,
    /// 完成百分比
    pub percent_done: u8,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始传输时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 结束时间 (Unix timestamp)
    pub completed_at: Option<i64>,
}

/// 会话内部可变表
#[derive(Debug, Default)]
struct SessionTables {
    /// 分片索引 -> 已确认字节数
    progress: HashMap<u32, u64>,
    /// 分片索引 -> 连续失败次数（成功后移除）
    retries: HashMap<u32, u32>,
    /// 分片索引 -> 在途取消句柄
    in_flight: HashMap<u32, CancellationToken>,
}

#[derive(Debug)]
struct StateCell {
    state: SessionState,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

/// 上传会话
#[derive(Debug)]
pub struct UploadSession {
    /// 会话 ID（日志追踪用）
    pub id: String,
    /// 目标文件名
    pub file_name: String,
    /// 文件总大小
    pub total_bytes: u64,
    /// 是否分片上传
    pub multipart: bool,

    tables: Mutex<SessionTables>,
    state: Mutex<StateCell>,
    record: Mutex<Option<UploadRecord>>,
    aborted: AtomicBool,
    /// 会话级取消令牌；分片句柄是它的子令牌
    cancel: CancellationToken,
    progress_tx: watch::Sender<ProgressEvent>,
}

impl UploadSession {
    /// 创建新会话
    pub fn new(file_name: impl Into<String>, total_bytes: u64, multipart: bool) -> Self {
        let (progress_tx, _) = watch::channel(ProgressEvent { percent_done: 0 });
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            total_bytes,
            multipart,
            tables: Mutex::new(SessionTables::default()),
            state: Mutex::new(StateCell {
                state: SessionState::Created,
                created_at: Utc::now().timestamp(),
                started_at: None,
                completed_at: None,
            }),
            record: Mutex::new(None),
            aborted: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            progress_tx,
        }
    }

    // =====================================================
    // 进度
    // =====================================================

    /// 完成百分比 [0, 100]
    ///
    /// 零字节文件定义为 100，避免除零。
    pub fn percent_done(&self) -> u8 {
        let tables = self.tables.lock();
        Self::percent_of(&tables.progress, self.total_bytes)
    }

    fn percent_of(progress: &HashMap<u32, u64>, total_bytes: u64) -> u8 {
        if total_bytes == 0 {
            return 100;
        }
        let uploaded: u64 = progress.values().sum();
        (uploaded * 100 / total_bytes) as u8
    }

    /// 订阅进度事件流
    pub fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// 记录分片传输进度（传输回调调用，单调递增）
    ///
    /// 中止后不再接受非零进度。
    pub(crate) fn record_progress(&self, index: u32, bytes: u64) {
        let mut tables = self.tables.lock();
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }
        tables.progress.insert(index, bytes);
        self.publish(&tables);
    }

    /// 分片尝试失败后将其进度清零
    pub(crate) fn reset_part_progress(&self, index: u32) {
        let mut tables = self.tables.lock();
        if let Some(bytes) = tables.progress.get_mut(&index) {
            *bytes = 0;
        }
        self.publish(&tables);
    }

    /// 标记分片完成：进度置满、清除重试计数
    pub(crate) fn mark_part_complete(&self, part: &Part) {
        let mut tables = self.tables.lock();
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }
        tables.progress.insert(part.index, part.len());
        tables.retries.remove(&part.index);
        self.publish(&tables);
    }

    /// 预置已落盘分片的进度（断点续传）
    pub(crate) fn seed_completed_part(&self, index: u32, len: u64) {
        let mut tables = self.tables.lock();
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }
        tables.progress.insert(index, len);
        self.publish(&tables);
    }

    /// 清零全部进度并推送一次事件（中止时调用）
    pub(crate) fn zero_all_progress(&self) {
        let mut tables = self.tables.lock();
        for bytes in tables.progress.values_mut() {
            *bytes = 0;
        }
        self.publish(&tables);
    }

    fn publish(&self, tables: &SessionTables) {
        self.progress_tx.send_replace(ProgressEvent {
            percent_done: Self::percent_of(&tables.progress, self.total_bytes),
        });
    }

    // =====================================================
    // 重试
    // =====================================================

    /// 增加分片连续失败次数，返回新值
    pub(crate) fn bump_retry(&self, index: u32) -> u32 {
        let mut tables = self.tables.lock();
        let count = tables.retries.entry(index).or_insert(0);
        *count += 1;
        *count
    }

    /// 分片当前连续失败次数
    pub fn retry_count(&self, index: u32) -> u32 {
        self.tables.lock().retries.get(&index).copied().unwrap_or(0)
    }

    // =====================================================
    // 取消
    // =====================================================

    /// 会话级取消令牌
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 为分片登记在途取消句柄（会话令牌的子令牌）
    pub(crate) fn register_in_flight(&self, index: u32) -> CancellationToken {
        let token = self.cancel.child_token();
        self.tables.lock().in_flight.insert(index, token.clone());
        token
    }

    /// 注销分片在途句柄（分片结算后调用，无论结果）
    pub(crate) fn release_in_flight(&self, index: u32) {
        self.tables.lock().in_flight.remove(&index);
    }

    /// 取消所有在途分片
    pub(crate) fn cancel_in_flight(&self) {
        let tables = self.tables.lock();
        for (index, token) in &tables.in_flight {
            debug!("会话 {} 取消在途分片 #{}", self.id, index);
            token.cancel();
        }
    }

    /// 当前在途分片数
    pub fn in_flight_count(&self) -> usize {
        self.tables.lock().in_flight.len()
    }

    // =====================================================
    // 中止标志
    // =====================================================

    /// 置位中止标志；返回是否为首次置位
    pub(crate) fn set_aborted(&self) -> bool {
        !self.aborted.swap(true, Ordering::SeqCst)
    }

    /// 会话是否已中止
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    // =====================================================
    // 状态机
    // =====================================================

    /// 当前状态
    pub fn state(&self) -> SessionState {
        self.state.lock().state
    }

    /// 状态迁移；处于终态时拒绝并返回 false
    pub(crate) fn transition(&self, to: SessionState) -> bool {
        let mut cell = self.state.lock();
        if cell.state.is_terminal() {
            return false;
        }
        debug!("会话 {} 状态迁移: {:?} -> {:?}", self.id, cell.state, to);
        cell.state = to;
        let now = Utc::now().timestamp();
        match to {
            SessionState::Transferring => {
                cell.started_at.get_or_insert(now);
            }
            SessionState::Done | SessionState::Aborted | SessionState::Failed => {
                cell.completed_at = Some(now);
            }
            _ => {}
        }
        true
    }

    // =====================================================
    // 上传记录
    // =====================================================

    /// 保存控制面返回的上传记录
    pub(crate) fn set_record(&self, record: UploadRecord) {
        *self.record.lock() = Some(record);
    }

    /// 上传记录副本
    pub fn record(&self) -> Option<UploadRecord> {
        self.record.lock().clone()
    }

    /// 服务端上传 ID（记录创建前为 None）
    pub fn upload_id(&self) -> Option<String> {
        self.record.lock().as_ref().map(|r| r.upload_id.clone())
    }

    /// 会话快照
    pub fn snapshot(&self) -> SessionSnapshot {
        let cell = self.state.lock();
        SessionSnapshot {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            total_bytes: self.total_bytes,
            multipart: self.multipart,
            state: cell.state,
            percent_done: self.percent_done(),
            created_at: cell.created_at,
            started_at: cell.started_at,
            completed_at: cell.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_done_floor() {
        let session = UploadSession::new("a.bin", 1000, true);
        session.record_progress(1, 333);
        // floor(333 * 100 / 1000) = 33
        assert_eq!(session.percent_done(), 33);

        session.record_progress(2, 667);
        assert_eq!(session.percent_done(), 100);
    }

    #[test]
    fn test_percent_done_zero_total() {
        let session = UploadSession::new("empty.bin", 0, true);
        assert_eq!(session.percent_done(), 100);
    }

    #[test]
    fn test_abort_suppresses_progress() {
        let session = UploadSession::new("a.bin", 1000, true);
        session.record_progress(1, 500);
        assert_eq!(session.percent_done(), 50);

        assert!(session.set_aborted());
        session.zero_all_progress();

        // 中止后非零进度被丢弃
        session.record_progress(1, 800);
        session.mark_part_complete(&Part::new(2, 500..1000));
        assert_eq!(session.percent_done(), 0);

        // 二次置位返回 false
        assert!(!session.set_aborted());
    }

    #[test]
    fn test_zero_all_publishes_event() {
        let session = UploadSession::new("a.bin", 100, true);
        let rx = session.subscribe();

        session.record_progress(1, 100);
        assert_eq!(rx.borrow().percent_done, 100);

        session.set_aborted();
        session.zero_all_progress();
        assert_eq!(rx.borrow().percent_done, 0);
    }

    #[test]
    fn test_seed_completed_part() {
        let session = UploadSession::new("a.bin", 4096, true);
        session.seed_completed_part(1, 2048);
        assert_eq!(session.percent_done(), 50);
    }

    #[test]
    fn test_retry_bookkeeping() {
        let session = UploadSession::new("a.bin", 100, true);
        assert_eq!(session.retry_count(3), 0);
        assert_eq!(session.bump_retry(3), 1);
        assert_eq!(session.bump_retry(3), 2);
        assert_eq!(session.retry_count(3), 2);

        // 成功后计数清除
        session.mark_part_complete(&Part::new(3, 0..100));
        assert_eq!(session.retry_count(3), 0);
    }

    #[test]
    fn test_in_flight_tokens_are_children() {
        let session = UploadSession::new("a.bin", 100, true);
        let token = session.register_in_flight(1);
        assert_eq!(session.in_flight_count(), 1);
        assert!(!token.is_cancelled());

        // 会话令牌取消会级联到分片令牌
        session.cancel_token().cancel();
        assert!(token.is_cancelled());

        session.release_in_flight(1);
        assert_eq!(session.in_flight_count(), 0);
    }

    #[test]
    fn test_state_transitions() {
        let session = UploadSession::new("a.bin", 100, true);
        assert_eq!(session.state(), SessionState::Created);

        assert!(session.transition(SessionState::RecordPending));
        assert!(session.transition(SessionState::Planned));
        assert!(session.transition(SessionState::Transferring));
        assert!(session.transition(SessionState::Completing));
        assert!(session.transition(SessionState::Done));

        // 终态后拒绝迁移
        assert!(!session.transition(SessionState::Aborted));
        assert_eq!(session.state(), SessionState::Done);

        let snapshot = session.snapshot();
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.completed_at.is_some());
    }

    #[test]
    fn test_snapshot_serializes() {
        let session = UploadSession::new("a.bin", 100, false);
        let json = serde_json::to_string(&session.snapshot()).unwrap();
        assert!(json.contains("\"state\":\"created\""));
    }
}
