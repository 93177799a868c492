//! 同步原语切换层。
//!
//! 教案级说明：`loom` 需要接管互斥锁与原子变量才能枚举调度交错，因此在模型检查配置下
//! 切换到 `loom::sync`；常规构建使用 `spin::Mutex`，锁只在 O(1) 的状态转换期间持有。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[cfg(not(any(loom, spark_loom)))]
pub(crate) type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;
#[cfg(any(loom, spark_loom))]
pub(crate) type MutexGuard<'a, T> = loom::sync::MutexGuard<'a, T>;

/// 统一 `lock()` 签名的互斥锁外壳。
pub(crate) struct Mutex<T> {
    #[cfg(not(any(loom, spark_loom)))]
    inner: spin::Mutex<T>,
    #[cfg(any(loom, spark_loom))]
    inner: loom::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            #[cfg(not(any(loom, spark_loom)))]
            inner: spin::Mutex::new(value),
            #[cfg(any(loom, spark_loom))]
            inner: loom::sync::Mutex::new(value),
        }
    }

    #[cfg(not(any(loom, spark_loom)))]
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// 不等待的加锁尝试，锁被占用时返回 `None`。
    #[cfg(not(any(loom, spark_loom)))]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    #[cfg(any(loom, spark_loom))]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }

    // 持锁期间不会 panic，中毒只可能来自测试线程本身，直接取回内部值。
    #[cfg(any(loom, spark_loom))]
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
