use std::{collections::VecDeque, sync::Arc};

use bytes::BytesMut;

use crate::{
    config::PoolConfig,
    error::{BlockError, PoolError},
    handle::PooledBlock,
    lease::LeaseContext,
    pool::{BlockPool, ReturnedBlock},
    sync::{AtomicBool, AtomicU64, AtomicUsize, Mutex, Ordering},
};

/// `DiagnosticPool` 是 [`BlockPool`] 的参考实现：按固定块大小租借内存，并聚合所有句柄上报的误用。
///
/// # 模块角色（Why）
/// - 为句柄提供一个真实可用的协作方，覆盖归还、关闭检查、错误上报与诊断上下文四个回调入口；
/// - 在测试与排障场景下，`reported_errors` 与 `statistics` 让“哪个句柄被误用、还有多少未归还”一目了然。
///
/// # 核心机制（How）
/// - 空闲链表 `free_list` 复用归还的 `BytesMut`，未命中时按 `block_size` 新分配清零内存；
/// - `PoolMetrics` 以原子计数跟踪活跃租约、累计租借/归还与泄漏回收次数；
/// - 上报的错误保存在容量为 `error_history` 的环形缓冲中，超出部分只计数。
///
/// # 契约说明（What）
/// - `rent` 返回的句柄长度恒为 `block_size`，内容为全零；
/// - `dispose` 之后所有未归还句柄的内存访问都会失败为 [`BlockError::PoolDisposed`]，
///   之后归还的内存直接丢弃而不再进入空闲链表；
/// - 所有方法均可跨线程并发调用。
///
/// # 设计权衡（Trade-offs）
/// - 不做 slab 切分，每个块独立分配；块的批量生产与回收策略不在本 crate 的职责内。
pub struct DiagnosticPool {
    config: PoolConfig,
    free_list: Mutex<Vec<BytesMut>>,
    context: Mutex<Option<LeaseContext>>,
    errors: Mutex<VecDeque<BlockError>>,
    disposed: AtomicBool,
    metrics: PoolMetrics,
}

impl DiagnosticPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            free_list: Mutex::new(Vec::new()),
            context: Mutex::new(None),
            errors: Mutex::new(VecDeque::new()),
            disposed: AtomicBool::new(false),
            metrics: PoolMetrics::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 租借一个块。
    ///
    /// # 错误
    /// - [`PoolError::Disposed`]：池已关闭。
    pub fn rent(self: &Arc<Self>) -> Result<PooledBlock, PoolError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        let region = self.acquire_region();
        self.metrics.rented.fetch_add(1, Ordering::Relaxed);
        self.metrics.active_leases.fetch_add(1, Ordering::AcqRel);
        Ok(PooledBlock::new(region, self, &self.config.lease))
    }

    /// 设置池级诊断上下文，之后句柄上的 `track` 会把它追加进各自的租约日志。
    pub fn set_context(&self, context: impl Into<LeaseContext>) {
        *self.context.lock() = Some(context.into());
    }

    pub fn clear_context(&self) {
        *self.context.lock() = None;
    }

    /// 最近上报的错误（最旧在前）。
    pub fn reported_errors(&self) -> Vec<BlockError> {
        self.errors.lock().iter().cloned().collect()
    }

    pub fn statistics(&self) -> PoolStats {
        PoolStats {
            block_size: self.config.block_size,
            active_leases: self.metrics.active_leases.load(Ordering::Acquire),
            free_blocks: self.free_list.lock().len(),
            total_rented: self.metrics.rented.load(Ordering::Relaxed),
            total_returned: self.metrics.returned.load(Ordering::Relaxed),
            leaked_returns: self.metrics.leaked.load(Ordering::Relaxed),
            reported_errors: self.metrics.reported.load(Ordering::Relaxed),
        }
    }

    /// 清空空闲链表，返回释放的字节数。
    pub fn shrink(&self) -> usize {
        let mut list = self.free_list.lock();
        let freed = list.iter().map(BytesMut::len).sum();
        list.clear();
        freed
    }

    /// 关闭池。
    ///
    /// # 契约说明（What）
    /// - 无论是否返回错误，调用后池都处于关闭状态，空闲链表被清空；
    /// - 仍有活跃租约时返回 [`PoolError::ActiveLeases`]，这些句柄此后的内存访问全部失败；
    /// - 重复关闭返回 [`PoolError::Disposed`]。
    pub fn dispose(&self) -> Result<(), PoolError> {
        {
            // 关闭标记与清空链表在同一把锁内完成，`return_block` 在锁内复核标记。
            let mut free_list = self.free_list.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return Err(PoolError::Disposed);
            }
            free_list.clear();
        }

        let count = self.metrics.active_leases.load(Ordering::Acquire);
        if count > 0 {
            tracing::warn!(
                active_leases = count,
                block_size = self.config.block_size,
                "block pool disposed with outstanding leases"
            );
            return Err(PoolError::ActiveLeases { count });
        }
        tracing::debug!(block_size = self.config.block_size, "block pool disposed");
        Ok(())
    }

    fn acquire_region(&self) -> BytesMut {
        let reused = self.free_list.lock().pop();
        match reused {
            Some(mut region) => {
                region.fill(0);
                region
            }
            None => BytesMut::zeroed(self.config.block_size),
        }
    }
}

impl BlockPool for DiagnosticPool {
    fn return_block(&self, block: ReturnedBlock) {
        saturating_decrement(&self.metrics.active_leases);
        self.metrics.returned.fetch_add(1, Ordering::Relaxed);
        if block.was_leaked() {
            self.metrics.leaked.fetch_add(1, Ordering::Relaxed);
        }

        if block.len() != self.config.block_size {
            return;
        }
        let mut free_list = self.free_list.lock();
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        free_list.push(block.into_region());
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn report_error(&self, error: &BlockError) {
        self.metrics.reported.fetch_add(1, Ordering::Relaxed);
        if self.config.error_history == 0 {
            return;
        }
        let mut errors = self.errors.lock();
        if errors.len() >= self.config.error_history {
            errors.pop_front();
        }
        errors.push_back(error.clone());
    }

    fn diagnostic_context(&self) -> Option<LeaseContext> {
        self.context.lock().clone()
    }
}

/// 池统计快照。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    pub block_size: usize,
    /// 尚未归还的租约数量。
    pub active_leases: usize,
    /// 空闲链表中可直接复用的块数量。
    pub free_blocks: usize,
    pub total_rented: u64,
    pub total_returned: u64,
    /// 经由“未释放即丢弃”路径归还的块数量。
    pub leaked_returns: u64,
    /// 累计上报的错误数量（含已被淘汰出历史的条目）。
    pub reported_errors: u64,
}

struct PoolMetrics {
    active_leases: AtomicUsize,
    rented: AtomicU64,
    returned: AtomicU64,
    leaked: AtomicU64,
    reported: AtomicU64,
}

impl PoolMetrics {
    fn new() -> Self {
        Self {
            active_leases: AtomicUsize::new(0),
            rented: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            leaked: AtomicU64::new(0),
            reported: AtomicU64::new(0),
        }
    }
}

fn saturating_decrement(target: &AtomicUsize) {
    let _ = target.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(1))
    });
}
