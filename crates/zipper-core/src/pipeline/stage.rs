//! 阶段编排：发送扇出与回包汇聚共用一条输出通道。

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use zipper_frame::DataFrame;

use super::{PipelineContext, dispatch::RoundRobinDispatcher, receive::receive_replies};
use crate::{directory::SessionDirectory, replica::StageDescriptor, transport::Session};

/// 接入一个阶段，返回该阶段的输出通道。
///
/// # 契约说明（What）
/// - 上游每条数据交给本阶段的 [`RoundRobinDispatcher`]，其发送任务与回包接收器写入同一条
///   输出通道；
/// - 阶段持有流水线令牌的子令牌。输出通道在以下任一情况后关闭：
///   - 流水线令牌被取消；
///   - 上游通道关闭，且所有在途发送结束、回包保持时长（`reply_linger`）也已过去；
/// - 将本函数的返回值作为下一阶段的 `upstream` 即完成串联，关闭沿链路逐级传递。
pub fn pipe_stage<S: Session>(
    ctx: &PipelineContext,
    directory: Arc<SessionDirectory<S>>,
    stage: Arc<dyn StageDescriptor<S>>,
    upstream: mpsc::Receiver<DataFrame>,
) -> mpsc::Receiver<DataFrame> {
    let scope = ctx.stage_scope();
    let (tx, rx) = scope.channel();
    let name = stage.snapshot().name;

    scope.tasks().spawn(receive_replies(
        scope.clone(),
        name.clone(),
        directory,
        tx.clone(),
    ));
    scope
        .tasks()
        .spawn(fan_out(scope.clone(), name, stage, upstream, tx));
    rx
}

async fn fan_out<S: Session>(
    scope: PipelineContext,
    name: Arc<str>,
    stage: Arc<dyn StageDescriptor<S>>,
    mut upstream: mpsc::Receiver<DataFrame>,
    out: mpsc::Sender<DataFrame>,
) {
    let dispatcher = RoundRobinDispatcher::new(stage);
    let cancel = scope.cancellation().clone();
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(stage = %name, "stage cancelled");
                return;
            }
            item = upstream.recv() => item,
        };
        match item {
            Some(item) => {
                let _ = dispatcher.dispatch(&scope, item, &out);
            }
            None => break,
        }
    }

    debug!(stage = %name, "upstream closed, draining in-flight sends");
    let sends = scope.sends().clone();
    sends.close();
    let linger = scope.reply_linger();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = async {
            sends.wait().await;
            tokio::time::sleep(linger).await;
        } => {}
    }
    debug!(stage = %name, "stage finished");
    cancel.cancel();
}
