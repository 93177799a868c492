use std::{
    fmt, mem,
    num::NonZeroUsize,
    ops::{Deref, DerefMut},
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    sync::{Arc, Weak},
};

use bytes::BytesMut;

use crate::{
    config::{BacktraceMode, LeaseConfig},
    error::{BlockError, Result},
    lease::{LeaseLog, LeaseRecord, LeaseSnapshot},
    pool::{BlockPool, ReturnedBlock},
    sync::{AtomicUsize, Mutex, MutexGuard, Ordering},
};

/// 钉住状态机：`Unpinned` →（首次钉住）→ `Pinned{1}` →（钉住/解除）… →（计数归零）→ `Unpinned`。
///
/// 基址只在首次钉住时计算并缓存，后续钉住复用同一基址并各自递增计数。
#[derive(Clone, Copy, Debug)]
enum PinState {
    Unpinned,
    Pinned { count: NonZeroUsize, base: NonNull<u8> },
}

impl PinState {
    fn count(&self) -> usize {
        match self {
            PinState::Unpinned => 0,
            PinState::Pinned { count, .. } => count.get(),
        }
    }
}

/// 句柄的全部可变状态，只在 `PooledBlock::state` 的锁内读写。
struct HandleState {
    region: BytesMut,
    pin: PinState,
    disposed: bool,
}

// `PinState::Pinned` 中的 `NonNull` 仅是 `region` 自身堆内存的地址缓存，
// 不引入额外的共享所有权；跨线程移动 `HandleState` 与移动 `BytesMut` 等价。
unsafe impl Send for HandleState {}

impl HandleState {
    /// 触碰内存前的公共前置检查：句柄未释放、池仍然存活。
    fn ensure_usable(&self, pool: Option<&dyn BlockPool>) -> Result<()> {
        if self.disposed {
            return Err(BlockError::HandleDisposed);
        }
        if !pool_is_live(pool) {
            return Err(BlockError::PoolDisposed);
        }
        Ok(())
    }

    /// 递增钉住计数并返回目标地址；`bool` 表示是否为首次钉住。
    fn acquire_pin(&mut self, offset: usize) -> Result<(BlockPin, bool)> {
        let len = self.region.len();
        if offset > len {
            return Err(BlockError::OffsetOutOfRange { offset, len });
        }

        let (base, count, first) = match self.pin {
            PinState::Unpinned => {
                let base = NonNull::from(&mut self.region[..]).cast::<u8>();
                (base, NonZeroUsize::MIN, true)
            }
            PinState::Pinned { count, base } => {
                let next = count
                    .checked_add(1)
                    .ok_or(BlockError::PinCountOverflow {
                        pin_count: count.get(),
                    })?;
                (base, next, false)
            }
        };
        self.pin = PinState::Pinned { count, base };

        // SAFETY: `offset <= len`，结果指针位于 `region` 分配范围内或恰好指向末尾之后一位；
        // `region` 在句柄生命周期内从不重新分配。
        let ptr = unsafe { base.add(offset) };
        Ok((BlockPin { ptr, offset }, first))
    }

    /// 递减钉住计数；`bool` 表示底层钉住是否随之释放。
    fn release_pin(&mut self) -> Result<bool> {
        match self.pin {
            PinState::Unpinned => Err(BlockError::PinCountZero),
            PinState::Pinned { count, base } => match NonZeroUsize::new(count.get() - 1) {
                Some(count) => {
                    self.pin = PinState::Pinned { count, base };
                    Ok(false)
                }
                None => {
                    self.pin = PinState::Unpinned;
                    Ok(true)
                }
            },
        }
    }

    /// 释放的权威检查，成功时交出区域并标记为已释放。
    fn take_for_dispose(&mut self, pool: Option<&dyn BlockPool>) -> Result<BytesMut> {
        let pin_count = self.pin.count();
        if pin_count > 0 {
            return Err(BlockError::HandleStillPinned { pin_count });
        }
        if self.disposed {
            return Err(BlockError::DoubleDispose);
        }
        if !pool_is_live(pool) {
            return Err(BlockError::PoolDisposed);
        }
        self.disposed = true;
        Ok(mem::take(&mut self.region))
    }
}

fn pool_is_live(pool: Option<&dyn BlockPool>) -> bool {
    pool.is_some_and(|pool| !pool.is_disposed())
}

/// `PooledBlock` 独占一块从池中借出的定长内存，并为其提供单一持有者的生命周期语义。
///
/// # 设计动机（Why）
/// - 池化内存的典型缺陷是重复释放、归还仍被钉住的块、以及池关闭后继续使用内存；
///   句柄把这些路径全部显式化为 [`BlockError`]，并在返回调用方之前先上报给所属池。
/// - 与原生代码互操作时需要稳定的裸地址，多个并发调用可能同时需要，因此钉住按引用计数管理。
///
/// # 架构关系（How）
/// - `state`：单一互斥锁保护区域、钉住状态机与释放标记，所有状态转换在锁内线性化；
/// - `pin_count`：钉住计数的无锁镜像，仅供建议性读取，权威判断始终在锁内完成；
/// - `lease`：独立的租约日志锁，`track` 从不与内存操作争用同一把锁；
/// - `pool`：指向所属池的 `Weak`，句柄从不延长池的生命周期，升级失败视同池已关闭。
///
/// # 契约说明（What）
/// - 构造后 `pin_count() == 0` 且 `is_disposed() == false`；
/// - `dispose` 成功至多一次，成功时恰好调用一次 [`BlockPool::return_block`]；
/// - 任一操作失败时，错误先经 [`BlockPool::report_error`] 上报，再原样返回；上报发生在释放句柄锁之后；
/// - 池是否关闭的检查是建议性的：与其它线程上正在进行的池关闭并发时，只保证尽力把竞争观测为
///   [`BlockError::PoolDisposed`]，调用方仍需保证池关闭后不再操作句柄。
///
/// # 风险与取舍（Trade-offs）
/// - 锁使用 `spin::Mutex`，只在 O(1) 的状态转换中持有；
/// - [`view`](Self::view) 需要 `&mut self`：视图存活期间借用检查器拒绝对同一句柄的任何其它调用，
///   其它线程也无法持有该句柄的引用，因此视图既不会自锁也不会让别的线程空转。
/// - 未释放即被丢弃的句柄由 `Drop` 兜底：未钉住时归还池，钉住时刻意泄漏内存以保持裸地址有效。
pub struct PooledBlock {
    state: Mutex<HandleState>,
    pin_count: AtomicUsize,
    len: usize,
    lease: Mutex<LeaseLog>,
    backtrace: BacktraceMode,
    pool: Weak<dyn BlockPool>,
}

impl PooledBlock {
    /// 围绕池交出的区域构造句柄。
    ///
    /// # 参数
    /// - `region`：句柄独占的内存，其当前长度即为块大小，句柄不会复制或重新分配它；
    /// - `pool`：产出该区域的池，句柄只保存其弱引用；
    /// - `lease`：租约诊断配置。
    pub fn new<P: BlockPool>(region: BytesMut, pool: &Arc<P>, lease: &LeaseConfig) -> Self {
        let pool: Weak<P> = Arc::downgrade(pool);
        Self::from_weak(region, pool, lease)
    }

    /// 以已经擦除类型的弱引用构造句柄，供持有 `Arc<dyn BlockPool>` 的池使用。
    pub fn from_weak(region: BytesMut, pool: Weak<dyn BlockPool>, lease: &LeaseConfig) -> Self {
        let len = region.len();
        Self {
            state: Mutex::new(HandleState {
                region,
                pin: PinState::Unpinned,
                disposed: false,
            }),
            pin_count: AtomicUsize::new(0),
            len,
            lease: Mutex::new(LeaseLog::new(lease)),
            backtrace: lease.backtrace,
            pool,
        }
    }

    /// 区域的逻辑长度，构造后固定不变。
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 钉住计数的无锁读取，仅作建议用途。
    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// 获取覆盖整个区域的读写视图。
    ///
    /// 视图直接别名区域内存而非拷贝。它独占借用句柄，下一次状态变更只能发生在视图被丢弃之后：
    ///
    /// ```compile_fail
    /// # use spark_pooled_block::{DiagnosticPool, PoolConfig};
    /// let pool = DiagnosticPool::new(PoolConfig::default().with_block_size(8));
    /// let mut block = pool.rent().unwrap();
    /// let view = block.view().unwrap();
    /// block.pin(0).unwrap();
    /// drop(view);
    /// ```
    ///
    /// # 错误
    /// - [`BlockError::HandleDisposed`]：句柄已释放；
    /// - [`BlockError::PoolDisposed`]：所属池已关闭。
    pub fn view(&mut self) -> Result<BlockView<'_>> {
        let pool = self.pool.upgrade();
        let outcome = {
            let guard = self.state.lock();
            guard
                .ensure_usable(pool.as_deref())
                .map(|()| BlockView { guard })
        };
        outcome.map_err(|err| self.report("view", pool.as_deref(), err))
    }

    /// 钉住区域并返回 `base + offset` 处的稳定地址。
    ///
    /// 首次钉住时缓存基址，后续钉住复用该基址并独立递增计数；每次成功的 `pin` 都必须配对一次 [`unpin`](Self::unpin)。
    ///
    /// # 错误
    /// - [`BlockError::HandleDisposed`]、[`BlockError::PoolDisposed`]；
    /// - [`BlockError::OffsetOutOfRange`]：`offset > len()`，此时钉住计数保持不变；
    /// - [`BlockError::PinCountOverflow`]：计数已达 `usize::MAX`。
    pub fn pin(&self, offset: usize) -> Result<BlockPin> {
        let pool = self.pool.upgrade();
        let outcome = {
            let mut state = self.state.lock();
            state
                .ensure_usable(pool.as_deref())
                .and_then(|()| state.acquire_pin(offset))
                .map(|(pin, first)| {
                    self.pin_count.store(state.pin.count(), Ordering::Release);
                    if first {
                        tracing::debug!(len = self.len, "pooled block pinned");
                    }
                    pin
                })
        };
        outcome.map_err(|err| self.report("pin", pool.as_deref(), err))
    }

    /// 解除一次钉住；计数归零时释放缓存的基址。
    ///
    /// # 错误
    /// - [`BlockError::PinCountZero`]：没有未解除的钉住，状态保持不变。
    pub fn unpin(&self) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock();
            state.release_pin().map(|released| {
                self.pin_count.store(state.pin.count(), Ordering::Release);
                if released {
                    tracing::debug!(len = self.len, "pooled block unpinned");
                }
            })
        };
        outcome.map_err(|err| {
            let pool = self.pool.upgrade();
            self.report("unpin", pool.as_deref(), err)
        })
    }

    /// 释放句柄，把区域归还给所属池。
    ///
    /// # 执行逻辑（How）
    /// 1. 无锁读取钉住计数作为第一道防线；
    /// 2. 在锁内依次复核：仍有钉住、已释放、池已关闭；
    /// 3. 通过复核后标记为已释放并取出区域，释放锁后调用 [`BlockPool::return_block`]。
    ///
    /// # 错误
    /// - [`BlockError::HandleStillPinned`]：仍有钉住，句柄保持未释放；
    /// - [`BlockError::DoubleDispose`]：重复释放；
    /// - [`BlockError::PoolDisposed`]：所属池已关闭。
    pub fn dispose(&self) -> Result<()> {
        let pool = self.pool.upgrade();

        let advisory = self.pin_count();
        if advisory > 0 {
            let err = BlockError::HandleStillPinned {
                pin_count: advisory,
            };
            return Err(self.report("dispose", pool.as_deref(), err));
        }

        let outcome = self.state.lock().take_for_dispose(pool.as_deref());
        match (outcome, pool) {
            (Ok(region), Some(pool)) => {
                tracing::debug!(len = self.len, "pooled block disposed");
                pool.return_block(ReturnedBlock::new(region, false));
                Ok(())
            }
            // 复核通过意味着池存活，这里只为穷尽匹配。
            (Ok(_), None) => Err(self.report("dispose", None, BlockError::PoolDisposed)),
            (Err(err), pool) => Err(self.report("dispose", pool.as_deref(), err)),
        }
    }

    /// 记录当前调用现场与池级诊断上下文。
    ///
    /// 纯观测操作：从不失败、不与内存操作争用锁，释放之后依旧可以调用。
    pub fn track(&self) {
        let record = LeaseRecord::capture(self.backtrace);
        let context = self.pool.upgrade().and_then(|pool| {
            panic::catch_unwind(AssertUnwindSafe(|| pool.diagnostic_context()))
                .ok()
                .flatten()
        });
        self.lease.lock().record(record, context);
    }

    /// 租约日志的只读拷贝。
    pub fn lease(&self) -> LeaseSnapshot {
        self.lease.lock().snapshot()
    }

    /// 先上报、后传播：记录日志并把错误交给池观测，池的上报钩子即便 panic 也不会改写原始错误。
    fn report(
        &self,
        operation: &'static str,
        pool: Option<&dyn BlockPool>,
        error: BlockError,
    ) -> BlockError {
        tracing::warn!(
            operation,
            code = error.code(),
            safety_critical = error.is_safety_critical(),
            %error,
            "pooled block misuse"
        );
        if let Some(pool) = pool {
            let reported = panic::catch_unwind(AssertUnwindSafe(|| pool.report_error(&error)));
            if reported.is_err() {
                tracing::error!(
                    operation,
                    code = error.code(),
                    "block pool error reporter panicked; original error preserved"
                );
            }
        }
        error
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        let (region, pin_count) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (mem::take(&mut state.region), state.pin.count())
        };

        let lease = self.lease.lock().snapshot();
        let pool = self.pool.upgrade();

        if pin_count > 0 {
            tracing::error!(
                pin_count,
                tracked = lease.tracked(),
                last_thread = lease.last().and_then(|record| record.thread_name()),
                "pooled block dropped while pinned; leaking region to keep raw addresses valid"
            );
            mem::forget(region);
            self.report("drop", pool.as_deref(), BlockError::Leaked { pinned: true });
            return;
        }

        tracing::warn!(
            tracked = lease.tracked(),
            last_thread = lease.last().and_then(|record| record.thread_name()),
            "pooled block dropped without dispose"
        );
        self.report("drop", pool.as_deref(), BlockError::Leaked { pinned: false });
        if let Some(pool) = pool.filter(|pool| !pool.is_disposed()) {
            pool.return_block(ReturnedBlock::new(region, true));
        }
    }
}

impl fmt::Debug for PooledBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 格式化可能发生在任意线程的日志路径上，锁被占用时不等待，`disposed` 显示为 `None`。
        let disposed = self.state.try_lock().map(|state| state.disposed);
        f.debug_struct("PooledBlock")
            .field("len", &self.len)
            .field("pin_count", &self.pin_count())
            .field("disposed", &disposed)
            .finish_non_exhaustive()
    }
}

/// 覆盖整个区域的视图，存活期间独占借用句柄。
pub struct BlockView<'a> {
    guard: MutexGuard<'a, HandleState>,
}

impl Deref for BlockView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard.region
    }
}

impl DerefMut for BlockView<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard.region
    }
}

impl fmt::Debug for BlockView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockView")
            .field("len", &self.len())
            .finish()
    }
}

/// 一次成功钉住得到的地址令牌。
///
/// 令牌本身不负责解除钉住；在对应的 [`PooledBlock::unpin`] 之前，地址保证有效且不会被池复用。
/// 通过地址读写内存需要调用方自行承担 `unsafe` 契约。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockPin {
    ptr: NonNull<u8>,
    offset: usize,
}

impl BlockPin {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// 地址的整数表示，便于比较与日志输出。
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr().addr()
    }

    /// 钉住时请求的偏移。
    pub fn offset(&self) -> usize {
        self.offset
    }
}

// 令牌只是地址值，解引用本身需要 `unsafe`；跨线程传递地址是互操作场景的常态。
unsafe impl Send for BlockPin {}
unsafe impl Sync for BlockPin {}
