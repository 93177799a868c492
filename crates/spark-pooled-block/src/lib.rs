//! `spark-pooled-block` 提供池化内存块的句柄实现。
//!
//! # 模块定位（Why）
//! - 池把定长内存块借给消费者后，需要一个对象来保证“单一持有者、恰好释放一次、钉住期间不归还、
//!   池关闭后不再访问”这几条不变量，并在并发访问下依旧成立；
//! - 句柄还要支持与原生代码互操作所需的稳定裸地址（引用计数钉住），
//!   以及供运维定位泄漏与误用的租约诊断。
//!
//! # 设计概要（How）
//! - `handle` 模块实现 [`PooledBlock`]：单一互斥锁保护区域、钉住状态机与释放标记；
//! - `pool` 模块以 [`BlockPool`] trait 描述句柄对池的全部回调（归还、关闭检查、错误上报、诊断上下文）；
//! - `lease` 模块保存 `track` 采集的调用现场，上下文写入容量受限的环形缓冲；
//! - `diagnostic_pool` 模块提供参考池 [`DiagnosticPool`]，聚合误用报告并在关闭时检测未归还租约；
//! - 所有误用都会先上报给所属池、再原样返回给调用方，日志通过 `tracing` 输出。
//!
//! # 命名约定（Consistency）
//! - 错误码沿用 `buffer.*` 点分前缀，与工作区其它缓冲组件的观测维度保持一致。

mod config;
mod diagnostic_pool;
mod error;
mod handle;
mod lease;
mod pool;
mod sync;

pub use config::{
    BacktraceMode, DEFAULT_BLOCK_SIZE, DEFAULT_CONTEXT_CAPACITY, DEFAULT_ERROR_HISTORY,
    LeaseConfig, PoolConfig,
};
pub use diagnostic_pool::{DiagnosticPool, PoolStats};
pub use error::{BlockError, PoolError, Result};
pub use handle::{BlockPin, BlockView, PooledBlock};
pub use lease::{LeaseContext, LeaseRecord, LeaseSnapshot};
pub use pool::{BlockPool, ReturnedBlock};
