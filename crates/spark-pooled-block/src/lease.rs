//! 租约诊断记录：记录“最后是谁触碰了这个句柄”。
//!
//! # 模块定位（Why）
//! - 句柄会跨越异步边界流转，泄漏（从未释放）或在不同调用点重复释放时往往无法确定性复现；
//!   人类可读的租约记录是生产环境排查池误用的主要线索。
//! - 记录仅用于观测，从不参与正确性判断。
//!
//! # 设计概要（How）
//! - [`LeaseRecord`] 保存一次 `track` 的调用栈、线程名与时间点；
//! - 池级上下文 [`LeaseContext`] 追加到容量受限的环形缓冲，超出容量时淘汰最旧条目并计数，
//!   避免泄漏密集的负载下无限增长；
//! - [`LeaseSnapshot`] 是对外暴露的只读拷贝，读取时不持有句柄的任何锁。

use std::{backtrace::Backtrace, collections::VecDeque, sync::Arc, thread, time::Instant};

use crate::config::{BacktraceMode, LeaseConfig};

/// 池级诊断上下文，例如当前请求或连接的标识。
///
/// 以 `Arc<str>` 保存标签，克隆开销恒定，适合在每次 `track` 时从池中复制一份。
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LeaseContext {
    label: Arc<str>,
}

impl LeaseContext {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl From<&str> for LeaseContext {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// 一次 `track` 调用留下的现场。
#[derive(Clone, Debug)]
pub struct LeaseRecord {
    backtrace: Arc<Backtrace>,
    thread: Option<String>,
    captured_at: Instant,
}

impl LeaseRecord {
    /// 按配置的策略捕获当前线程的现场。
    pub(crate) fn capture(mode: BacktraceMode) -> Self {
        let backtrace = match mode {
            BacktraceMode::Off => Backtrace::disabled(),
            BacktraceMode::Env => Backtrace::capture(),
            BacktraceMode::Always => Backtrace::force_capture(),
        };
        Self {
            backtrace: Arc::new(backtrace),
            thread: thread::current().name().map(str::to_owned),
            captured_at: Instant::now(),
        }
    }

    /// 捕获到的调用栈；策略为 `Off` 或环境未开启时状态为 `Disabled`。
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// 调用 `track` 的线程名，匿名线程为 `None`。
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// 句柄内部的租约日志，由独立于状态锁的互斥锁保护。
#[derive(Debug)]
pub(crate) struct LeaseLog {
    capacity: usize,
    last: Option<LeaseRecord>,
    contexts: VecDeque<LeaseContext>,
    tracked: u64,
    evicted: u64,
}

impl LeaseLog {
    pub(crate) fn new(config: &LeaseConfig) -> Self {
        Self {
            capacity: config.context_capacity,
            last: None,
            contexts: VecDeque::new(),
            tracked: 0,
            evicted: 0,
        }
    }

    /// 记录一次 `track`：覆盖最近现场，并把上下文追加进环形缓冲。
    pub(crate) fn record(&mut self, record: LeaseRecord, context: Option<LeaseContext>) {
        self.last = Some(record);
        self.tracked = self.tracked.saturating_add(1);

        let Some(context) = context else {
            return;
        };
        if self.capacity == 0 {
            self.evicted = self.evicted.saturating_add(1);
            return;
        }
        if self.contexts.len() >= self.capacity {
            self.contexts.pop_front();
            self.evicted = self.evicted.saturating_add(1);
        }
        self.contexts.push_back(context);
    }

    pub(crate) fn snapshot(&self) -> LeaseSnapshot {
        LeaseSnapshot {
            last: self.last.clone(),
            contexts: self.contexts.iter().cloned().collect(),
            tracked: self.tracked,
            evicted_contexts: self.evicted,
        }
    }
}

/// 租约日志的只读拷贝，供泄漏分析或事后排查使用。
#[derive(Clone, Debug)]
pub struct LeaseSnapshot {
    last: Option<LeaseRecord>,
    contexts: Vec<LeaseContext>,
    tracked: u64,
    evicted_contexts: u64,
}

impl LeaseSnapshot {
    /// 最近一次 `track` 的现场。
    pub fn last(&self) -> Option<&LeaseRecord> {
        self.last.as_ref()
    }

    /// 按追加顺序排列的上下文（最旧在前）。
    pub fn contexts(&self) -> &[LeaseContext] {
        &self.contexts
    }

    /// 累计 `track` 次数。
    pub fn tracked(&self) -> u64 {
        self.tracked
    }

    /// 因容量限制被淘汰的上下文数量。
    pub fn evicted_contexts(&self) -> u64 {
        self.evicted_contexts
    }
}
