//! 池与租约诊断的配置项。
//!
//! # 教案式说明
//! - **意图 (Why)**：租约上下文日志在泄漏密集的场景下会持续增长，必须以配置给出上限；
//!   调用栈捕获开销较大，也需要允许宿主按环境开关。
//! - **契约 (What)**：所有字段均有默认值，可直接 `Default::default()`，也可由宿主选用任意 serde 格式反序列化，
//!   缺省字段回落为默认值。
//! - **设计权衡 (Trade-offs)**：不读取环境变量或文件，配置来源完全交给宿主决定。

use serde::Deserialize;

/// 默认租约上下文环形缓冲容量。
pub const DEFAULT_CONTEXT_CAPACITY: usize = 16;

/// 参考池默认块大小（字节）。
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// 参考池默认保留的已上报错误条数。
pub const DEFAULT_ERROR_HISTORY: usize = 64;

/// `track` 捕获调用栈的策略。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktraceMode {
    /// 不捕获调用栈，仅记录线程与时间点。
    Off,
    /// 遵循 `RUST_BACKTRACE` / `RUST_LIB_BACKTRACE` 环境变量。
    #[default]
    Env,
    /// 无条件捕获。
    Always,
}

/// 单个句柄的租约诊断配置。
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// 环形缓冲最多保留的上下文条目数；为 0 时不保留任何上下文，仅计数。
    pub context_capacity: usize,
    /// 调用栈捕获策略。
    pub backtrace: BacktraceMode,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            context_capacity: DEFAULT_CONTEXT_CAPACITY,
            backtrace: BacktraceMode::default(),
        }
    }
}

impl LeaseConfig {
    pub fn with_context_capacity(mut self, capacity: usize) -> Self {
        self.context_capacity = capacity;
        self
    }

    pub fn with_backtrace(mut self, mode: BacktraceMode) -> Self {
        self.backtrace = mode;
        self
    }
}

/// 参考池 [`DiagnosticPool`](crate::DiagnosticPool) 的配置。
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 每个块的固定字节数。
    pub block_size: usize,
    /// 池保留的最近上报错误条数，更早的条目只计数不保留。
    pub error_history: usize,
    /// 该池产出的所有句柄共享的租约配置。
    pub lease: LeaseConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            error_history: DEFAULT_ERROR_HISTORY,
            lease: LeaseConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_error_history(mut self, error_history: usize) -> Self {
        self.error_history = error_history;
        self
    }

    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }
}
