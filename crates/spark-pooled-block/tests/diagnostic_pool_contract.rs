//! `diagnostic_pool_contract` 集成测试：验证 `DiagnosticPool` 在真实调用路径下的契约执行情况。
//!
//! # 测试目标（Why）
//! - 保障租借、归还、关闭、误用聚合等流程能在 crate 公开 API 下正确协作；
//! - 及时捕获统计字段、空闲链表复用等回归。

use spark_pooled_block::{
    BacktraceMode, BlockError, DiagnosticPool, LeaseConfig, PoolConfig, PoolError,
};

fn pool_with_block_size(block_size: usize) -> std::sync::Arc<DiagnosticPool> {
    DiagnosticPool::new(
        PoolConfig::default()
            .with_block_size(block_size)
            .with_lease(LeaseConfig::default().with_backtrace(BacktraceMode::Off)),
    )
}

/// 通过多次租借 / 归还验证统计维度的生命周期演进。
#[test]
fn stats_track_lease_lifecycle() {
    let pool = pool_with_block_size(64);
    let first = pool.rent().expect("租借");
    let second = pool.rent().expect("租借");
    assert_eq!(first.len(), 64);

    let stats = pool.statistics();
    assert_eq!(stats.active_leases, 2);
    assert_eq!(stats.total_rented, 2);

    first.dispose().expect("释放");
    second.dispose().expect("释放");
    let stats = pool.statistics();
    assert_eq!(stats.active_leases, 0);
    assert_eq!(stats.total_returned, 2);
    assert_eq!(stats.free_blocks, 2);
    assert_eq!(stats.leaked_returns, 0);
}

/// 池关闭后，未归还句柄的所有内存访问都失败为 `PoolDisposed`，并被池记录。
#[test]
fn dispose_with_outstanding_lease_invalidates_handles() {
    let pool = pool_with_block_size(32);
    let mut block = pool.rent().expect("租借");

    assert_eq!(pool.dispose(), Err(PoolError::ActiveLeases { count: 1 }));
    assert_eq!(pool.dispose(), Err(PoolError::Disposed));
    assert_eq!(pool.rent().expect_err("关闭后拒绝租借"), PoolError::Disposed);

    assert_eq!(block.view().expect_err("视图"), BlockError::PoolDisposed);
    assert_eq!(block.dispose(), Err(BlockError::PoolDisposed));
    assert_eq!(
        pool.reported_errors(),
        vec![BlockError::PoolDisposed, BlockError::PoolDisposed]
    );
}

#[test]
fn clean_dispose_succeeds() {
    let pool = pool_with_block_size(32);
    let block = pool.rent().expect("租借");
    block.dispose().expect("释放");
    pool.dispose().expect("无活跃租约时关闭应成功");
    assert_eq!(pool.statistics().free_blocks, 0, "关闭时清空空闲链表");
}

/// 泄漏的句柄仍会把内存交还池，并计入泄漏统计。
#[test]
fn leaked_handle_is_reclaimed() {
    let pool = pool_with_block_size(16);
    drop(pool.rent().expect("租借"));
    let stats = pool.statistics();
    assert_eq!(stats.active_leases, 0);
    assert_eq!(stats.leaked_returns, 1);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(
        pool.reported_errors(),
        vec![BlockError::Leaked { pinned: false }]
    );
}

/// 池级上下文经由 `track` 进入句柄的租约日志。
#[test]
fn context_flows_into_lease() {
    let pool = pool_with_block_size(16);
    let block = pool.rent().expect("租借");

    pool.set_context("conn-7");
    block.track();
    pool.clear_context();
    block.track();

    let lease = block.lease();
    assert_eq!(lease.tracked(), 2);
    assert_eq!(lease.contexts().len(), 1);
    assert_eq!(lease.contexts()[0].label(), "conn-7");
    block.dispose().expect("释放");
}

/// 租约上下文容量来自池配置。
#[test]
fn lease_capacity_follows_pool_config() {
    let pool = DiagnosticPool::new(
        PoolConfig::default().with_block_size(8).with_lease(
            LeaseConfig::default()
                .with_context_capacity(2)
                .with_backtrace(BacktraceMode::Off),
        ),
    );
    let block = pool.rent().expect("租借");
    for label in ["a", "b", "c", "d"] {
        pool.set_context(label);
        block.track();
    }
    let lease = block.lease();
    assert_eq!(lease.contexts().len(), 2);
    assert_eq!(lease.evicted_contexts(), 2);
    assert_eq!(lease.contexts()[1].label(), "d");
    block.dispose().expect("释放");
}
