//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义池化内存块句柄可能暴露的全部失败语义，调用方与所属池看到的是同一个错误值；
//! - 所有变体都代表 API 契约被违反（调用方缺陷），而非瞬时故障，因此句柄内部从不重试、从不吞掉错误。
//!
//! ## 设计要求（What）
//! - 错误类型派生 `thiserror::Error`，兼容 `std::error::Error` 生态；
//! - 每个变体提供稳定的点分错误码（[`BlockError::code`]），便于池侧聚合与告警维度对齐；
//! - 错误值满足 `Clone + Send + Sync + 'static`，可同时交给池的上报钩子与直接调用方。

use thiserror::Error;

/// 本 crate 统一使用的 `Result` 别名。
pub type Result<T, E = BlockError> = core::result::Result<T, E>;

/// 池化内存块句柄的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“句柄已释放”“池已关闭”“钉住计数不平衡”等误用路径收敛为有限枚举，
///   让池的诊断钩子能够按类别统计，而直接调用方拿到的仍是未经改写的原始错误。
/// - **契约 (What)**：
///   - 任何变体出现都意味着调用链存在需要修复的代码缺陷，调用方不应在同一句柄上“捕获后继续”；
///   - [`BlockError::HandleStillPinned`] 属于安全级错误：若被忽略，池可能把仍有裸地址存活的内存交给新的持有者。
/// - **设计权衡 (Trade-offs)**：变体只携带整数上下文，避免在错误路径上分配堆内存。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BlockError {
    /// 句柄已经完成释放，仍有调用试图访问其内存。
    #[error("pooled block handle has already been disposed")]
    HandleDisposed,

    /// 所属池已经关闭，句柄背后的内存不再有效。
    ///
    /// - **意图 (Why)**：识别“消费者活得比池更久”的生命周期缺陷，避免访问已被回收的 slab；
    /// - **契约 (What)**：即使句柄本身从未被单独释放，也会返回该错误。
    #[error("owning block pool has been disposed; block memory is no longer backed")]
    PoolDisposed,

    /// 钉住偏移超出区域范围。
    #[error("pin offset {offset} is out of range for a block of {len} bytes")]
    OffsetOutOfRange { offset: usize, len: usize },

    /// 在没有任何未解除钉住的情况下调用了 `unpin`。
    #[error("unpin called with no outstanding pins")]
    PinCountZero,

    /// 钉住计数已达上限，无法再记录新的钉住。
    #[error("pin count overflow: {pin_count} outstanding pins")]
    PinCountOverflow { pin_count: usize },

    /// 仍有钉住未解除时尝试释放句柄。
    ///
    /// - **风险 (Trade-offs)**：归还被钉住的块会让同一段内存同时拥有新旧两个持有者，
    ///   因此该错误永远不会被静默处理。
    #[error("cannot dispose a pooled block while {pin_count} pin(s) are outstanding")]
    HandleStillPinned { pin_count: usize },

    /// 重复释放同一句柄。
    #[error("pooled block handle disposed twice")]
    DoubleDispose,

    /// 句柄在未调用 `dispose` 的情况下被丢弃。
    ///
    /// - **契约 (What)**：仅由 `Drop` 路径上报给池，不会作为任何方法的返回值出现；
    ///   `pinned == true` 表示内存被刻意泄漏以保持裸地址有效。
    #[error("pooled block dropped without dispose (pinned: {pinned})")]
    Leaked { pinned: bool },
}

impl BlockError {
    /// 返回稳定的点分错误码，用于日志字段与池侧聚合。
    pub fn code(&self) -> &'static str {
        match self {
            BlockError::HandleDisposed => "buffer.block.disposed",
            BlockError::PoolDisposed => "buffer.pool.disposed",
            BlockError::OffsetOutOfRange { .. } => "buffer.block.offset_out_of_range",
            BlockError::PinCountZero => "buffer.block.pin_count_zero",
            BlockError::PinCountOverflow { .. } => "buffer.block.pin_count_overflow",
            BlockError::HandleStillPinned { .. } => "buffer.block.still_pinned",
            BlockError::DoubleDispose => "buffer.block.double_dispose",
            BlockError::Leaked { .. } => "buffer.block.leaked",
        }
    }

    /// 是否属于可能导致内存被两个持有者同时使用的安全级错误。
    pub fn is_safety_critical(&self) -> bool {
        matches!(
            self,
            BlockError::HandleStillPinned { .. } | BlockError::Leaked { pinned: true }
        )
    }
}

/// 参考池 [`DiagnosticPool`](crate::DiagnosticPool) 自身的错误域。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PoolError {
    /// 池已关闭，拒绝新的租借或重复关闭。
    #[error("block pool has already been disposed")]
    Disposed,

    /// 关闭时仍有未归还的租约。
    ///
    /// - **契约 (What)**：池依旧会进入关闭状态；`count` 为关闭瞬间观测到的活跃租约数量。
    #[error("block pool disposed with {count} active lease(s)")]
    ActiveLeases { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let all = [
            BlockError::HandleDisposed,
            BlockError::PoolDisposed,
            BlockError::OffsetOutOfRange { offset: 1, len: 0 },
            BlockError::PinCountZero,
            BlockError::PinCountOverflow {
                pin_count: usize::MAX,
            },
            BlockError::HandleStillPinned { pin_count: 1 },
            BlockError::DoubleDispose,
            BlockError::Leaked { pinned: false },
        ];
        let mut codes: Vec<_> = all.iter().map(BlockError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn only_pinned_release_paths_are_safety_critical() {
        assert!(BlockError::HandleStillPinned { pin_count: 2 }.is_safety_critical());
        assert!(BlockError::Leaked { pinned: true }.is_safety_critical());
        assert!(!BlockError::Leaked { pinned: false }.is_safety_critical());
        assert!(!BlockError::DoubleDispose.is_safety_critical());
    }

    #[test]
    fn display_carries_context() {
        let err = BlockError::OffsetOutOfRange { offset: 65, len: 64 };
        assert_eq!(
            err.to_string(),
            "pin offset 65 is out of range for a block of 64 bytes"
        );
    }
}
