//! 阶段内的轮询分发。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};
use zipper_frame::DataFrame;

use super::{PipelineContext, send::SendOutcome, send::send_to_replica};
use crate::{
    replica::{Replica, StageDescriptor},
    transport::Session,
};

/// 一次选择的结果。
#[derive(Debug)]
pub enum Route<S> {
    /// 阶段当前没有副本，数据将被丢弃。
    NoReplica { stage: Arc<str> },
    Replica(Selection<S>),
}

/// 选中的副本及其在快照中的下标。
#[derive(Debug)]
pub struct Selection<S> {
    pub stage: Arc<str>,
    pub index: usize,
    pub replica: Replica<S>,
}

/// 轮询分发器。
///
/// # 教案式说明
/// - **意图（Why）**：在一个阶段的多个副本之间平均分摊数据，不做权重或健康感知；
/// - **契约（What）**：
///   - 每次分发都重新拉取阶段快照；
///   - 零副本：以 `info` 记录并丢弃；
///   - 单副本：直接选中，不触碰计数器；
///   - 多副本：原子自增计数器，选中 `replicas[(counter - 1) % len]`，新建分发器从下标 0 开始；
///   - 计数器归属于分发器实例，在一个阶段的整个生命周期内持续轮转；
///   - 每次发送都是独立任务，卡住的副本不会阻塞后续分发。
pub struct RoundRobinDispatcher<S> {
    stage: Arc<dyn StageDescriptor<S>>,
    next: AtomicUsize,
}

impl<S: Session> RoundRobinDispatcher<S> {
    pub fn new(stage: Arc<dyn StageDescriptor<S>>) -> Self {
        Self {
            stage,
            next: AtomicUsize::new(0),
        }
    }

    /// 按轮询规则选择副本。
    pub fn select(&self) -> Route<S> {
        let snapshot = self.stage.snapshot();
        let mut replicas = snapshot.replicas;
        let index = match replicas.len() {
            0 => {
                return Route::NoReplica {
                    stage: snapshot.name,
                };
            }
            1 => 0,
            len => self.next.fetch_add(1, Ordering::Relaxed) % len,
        };
        Route::Replica(Selection {
            stage: snapshot.name,
            index,
            replica: replicas.swap_remove(index),
        })
    }

    /// 选择副本并派生发送任务。
    ///
    /// 返回发送任务的句柄；没有副本时返回 `None`。调用方无需等待句柄，发送任务同时登记在
    /// 流水线与阶段的追踪器上。
    pub fn dispatch(
        &self,
        ctx: &PipelineContext,
        item: DataFrame,
        out: &mpsc::Sender<DataFrame>,
    ) -> Option<JoinHandle<SendOutcome>> {
        match self.select() {
            Route::NoReplica { stage } => {
                info!(
                    stage = %stage,
                    transaction_id = %item.transaction_id(),
                    "no replica available, dropping item"
                );
                None
            }
            Route::Replica(Selection {
                stage,
                index,
                replica,
            }) => {
                debug!(stage = %stage, index, transaction_id = %item.transaction_id(), "dispatching item");
                let send_ctx = ctx.clone();
                let out = out.clone();
                let send = async move {
                    send_to_replica(&send_ctx, &stage, &replica, item, &out).await
                };
                Some(ctx.tasks().spawn(ctx.sends().track_future(send)))
            }
        }
    }
}

impl<S> fmt::Debug for RoundRobinDispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobinDispatcher")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}
