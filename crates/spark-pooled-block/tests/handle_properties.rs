//! `PooledBlock` 状态机性质验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：对任意操作序列，句柄的钉住计数、释放标记与错误返回都必须与一个影子模型一致；
//!   模型即“计数非负、钉住期间不可释放、释放恰好一次、失败不改变状态”这几条不变量的直接表达。
//! - **设计手法 (How)**：使用 Proptest 生成 `Op` 序列，逐条同时驱动真实句柄与 `Model`，比较结果与可观测状态。
//! - **合同与边界 (What)**：偏移在 `0..=LEN + 2` 内随机，覆盖合法与越界两类输入。

use std::sync::Arc;

use proptest::prelude::*;
use spark_pooled_block::{BacktraceMode, BlockError, DiagnosticPool, LeaseConfig, PoolConfig};

const LEN: usize = 24;

#[derive(Clone, Debug)]
enum Op {
    Pin(usize),
    Unpin,
    Dispose,
    View,
    Track,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..=LEN + 2).prop_map(Op::Pin),
        3 => Just(Op::Unpin),
        1 => Just(Op::Dispose),
        1 => Just(Op::View),
        1 => Just(Op::Track),
    ]
}

#[derive(Default)]
struct Model {
    pins: usize,
    disposed: bool,
}

impl Model {
    fn apply(&mut self, op: &Op) -> Result<(), BlockError> {
        match *op {
            Op::Pin(offset) => {
                if self.disposed {
                    return Err(BlockError::HandleDisposed);
                }
                if offset > LEN {
                    return Err(BlockError::OffsetOutOfRange { offset, len: LEN });
                }
                self.pins += 1;
                Ok(())
            }
            Op::Unpin => {
                if self.pins == 0 {
                    return Err(BlockError::PinCountZero);
                }
                self.pins -= 1;
                Ok(())
            }
            Op::Dispose => {
                if self.pins > 0 {
                    return Err(BlockError::HandleStillPinned {
                        pin_count: self.pins,
                    });
                }
                if self.disposed {
                    return Err(BlockError::DoubleDispose);
                }
                self.disposed = true;
                Ok(())
            }
            Op::View => {
                if self.disposed {
                    Err(BlockError::HandleDisposed)
                } else {
                    Ok(())
                }
            }
            Op::Track => Ok(()),
        }
    }
}

fn pool() -> Arc<DiagnosticPool> {
    DiagnosticPool::new(
        PoolConfig::default()
            .with_block_size(LEN)
            .with_lease(LeaseConfig::default().with_backtrace(BacktraceMode::Off)),
    )
}

proptest! {
    #[test]
    fn prop_handle_matches_model(ops in prop::collection::vec(op(), 0..64)) {
        let pool = pool();
        let mut block = pool.rent().expect("租借");
        let mut model = Model::default();
        let mut bases = Vec::new();
        let mut view_lens = Vec::new();

        for op in &ops {
            let expected = model.apply(op);
            let actual = match *op {
                Op::Pin(offset) => block
                    .pin(offset)
                    .map(|pin| bases.push(pin.addr() - pin.offset())),
                Op::Unpin => block.unpin(),
                Op::Dispose => block.dispose(),
                Op::View => block.view().map(|view| view_lens.push(view.len())),
                Op::Track => {
                    block.track();
                    Ok(())
                }
            };
            prop_assert_eq!(&actual, &expected, "op {:?}", op);
            prop_assert_eq!(block.pin_count(), model.pins);
            prop_assert_eq!(block.is_disposed(), model.disposed);
        }

        prop_assert!(bases.windows(2).all(|pair| pair[0] == pair[1]), "基址在句柄生命周期内固定");
        prop_assert!(view_lens.iter().all(|len| *len == LEN));

        let reported = pool.reported_errors().len();
        let expected_reports = ops
            .iter()
            .scan(Model::default(), |model, op| Some(model.apply(op).is_err()))
            .filter(|failed| *failed)
            .count();
        prop_assert_eq!(reported, expected_reports.min(pool.config().error_history));

        while block.pin_count() > 0 {
            block.unpin().expect("收尾解除");
        }
        if !block.is_disposed() {
            block.dispose().expect("收尾释放");
        }
    }
}
