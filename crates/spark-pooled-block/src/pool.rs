use bytes::BytesMut;

use crate::{error::BlockError, lease::LeaseContext};

/// `BlockPool` 描述句柄向所属池发起回调的全部入口。
///
/// # 设计初衷（Why）
/// - 句柄只需要池的一个很窄的子集：归还内存、查询池是否已关闭、上报误用、读取诊断上下文；
///   以 trait 表达这一边界，可以让切分 slab、空闲链表、伸缩策略等池内细节完全留在实现方。
/// - 句柄通过 `Weak<dyn BlockPool>` 持有池，从不延长池的生命周期。
///
/// # 契约定义（What）
/// - 实现必须 `Send + Sync`：同一池的多个句柄会在不同线程上并发回调；
/// - [`return_block`](Self::return_block) 对每个句柄至多调用一次，发生在成功释放之后（或泄漏回收路径中）；
/// - [`is_disposed`](Self::is_disposed) 在每次触碰内存之前被读取，实现需保证并发读安全；
/// - [`report_error`](Self::report_error) 不得 panic；即便 panic，句柄也会吞掉该 panic 并把原始错误交还调用方；
/// - 句柄在调用上述方法时不持有自身的锁，实现可以安全地回调句柄的只读接口。
pub trait BlockPool: Send + Sync + 'static {
    /// 接收一块归还的内存。
    fn return_block(&self, block: ReturnedBlock);

    /// 池是否已经关闭。
    fn is_disposed(&self) -> bool;

    /// 观测句柄上发生的误用。
    fn report_error(&self, error: &BlockError);

    /// 当前池级诊断上下文，仅供 `track` 读取。
    fn diagnostic_context(&self) -> Option<LeaseContext> {
        None
    }
}

/// 表示一次归还动作所携带的内存。
///
/// # 数据结构解析（How）
/// - `region`：句柄独占的原始 `BytesMut`，长度保持为块大小；
/// - `leaked`：为 `true` 时表示该块来自“未释放即丢弃”的回收路径，池可据此决定是否复用。
#[derive(Debug)]
pub struct ReturnedBlock {
    region: BytesMut,
    leaked: bool,
}

impl ReturnedBlock {
    pub(crate) fn new(region: BytesMut, leaked: bool) -> Self {
        Self { region, leaked }
    }

    /// 归还区域的字节长度。
    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// 是否经由泄漏回收路径归还。
    pub fn was_leaked(&self) -> bool {
        self.leaked
    }

    /// 消耗结构并交出底层内存。
    pub fn into_region(self) -> BytesMut {
        self.region
    }
}
