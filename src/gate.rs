// 准入控制
//
// 两个进程级准入闸门由调用方显式构造并注入每个上传会话（而不是模块级
// 全局状态），测试可以换成更小容量的实例：
// - creation: 容量 1，串行化上传记录创建，保证创建顺序等于选择顺序
// - transfer: 容量 PARALLELISM，限制所有会话合计的并发分片传输数
//
// tokio 的 Semaphore 按请求顺序排队发放许可，creation 闸门因此天然满足
// FIFO 创建顺序约定。

use crate::config::PARALLELISM;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 准入闸门（FIFO 计数信号量）
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// 闸门令牌，drop 时归还许可并立即唤醒队首等待者
#[derive(Debug)]
pub struct GateToken {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// 创建指定容量的闸门
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// 获取一个许可，满载时按 FIFO 排队等待
    pub async fn acquire(&self) -> GateToken {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("准入信号量不会被关闭");
        GateToken { _permit: permit }
    }

    /// 非阻塞获取，满载时返回 None
    pub fn try_acquire(&self) -> Option<GateToken> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GateToken { _permit: permit })
    }

    /// 闸门容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 当前持有中的许可数
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// 进程级上传闸门组
///
/// 所有上传会话共享同一组闸门；每个 FileUploader 在构造时注入。
#[derive(Debug, Clone)]
pub struct UploadGates {
    /// 创建闸门：串行化 create_upload 调用（容量 1）
    pub creation: Arc<AdmissionGate>,
    /// 传输闸门：限制全局并发分片传输数
    pub transfer: Arc<AdmissionGate>,
}

impl UploadGates {
    /// 创建闸门组，传输并发数由调用方指定
    pub fn new(parallelism: usize) -> Self {
        Self {
            creation: Arc::new(AdmissionGate::new(1)),
            transfer: Arc::new(AdmissionGate::new(parallelism)),
        }
    }
}

impl Default for UploadGates {
    fn default() -> Self {
        Self::new(PARALLELISM)
    }
}
