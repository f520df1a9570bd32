//! 单个副本的发送路径。

use tokio::{io::AsyncWriteExt, sync::mpsc};
use tracing::{debug, error, info};
use zipper_frame::DataFrame;

use super::{PipelineContext, forward};
use crate::{
    error::{TransportError, TransportOp},
    replica::Replica,
    span::{SpanDirection, SpanRequest},
    transport::Session,
};

/// 一次发送的结局，仅供测试与诊断使用；流水线本身不向上游报告单条失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// 已写入出站子流并关闭写端，回包（若有）经接收路径到达。
    Delivered,
    /// 副本不可用，原始数据已原样写入阶段输出，副本已注销。
    PassedThrough,
    /// 写入中途失败，数据被丢弃，副本已注销。
    Dropped,
    /// 流水线取消，未写入任何通道。
    Cancelled,
}

/// 把一条数据发送给选中的副本。
///
/// # 契约说明（What）
/// - 副本没有会话：原样透传到 `out`，随后调用 `cancel()` 注销副本，不重试；透传因取消而
///   未完成时不注销；
/// - 打开出站子流失败：同上；
/// - 打开成功后写入或关闭写端失败：调用 `cancel()`，丢弃数据（至多一次语义）；
/// - 成功写入后不等待回包；
/// - 取消令牌触发时立即返回 [`SendOutcome::Cancelled`]，不注销副本。
///
/// 追踪钩子仅对持有会话的副本开启 `zipper-send-to-<stage>` Span，并在整个发送过程中保持。
pub async fn send_to_replica<S: Session>(
    ctx: &PipelineContext,
    stage: &str,
    replica: &Replica<S>,
    item: DataFrame,
    out: &mpsc::Sender<DataFrame>,
) -> SendOutcome {
    let cancel = ctx.cancellation();
    let Some(session) = replica.session() else {
        info!(
            stage,
            replica = %replica.id(),
            transaction_id = %item.transaction_id(),
            "replica has no session, passing item through"
        );
        return pass_through(ctx, replica, item, out).await;
    };

    let label = format!("zipper-send-to-{stage}");
    let span = ctx.hook().start(&SpanRequest {
        direction: SpanDirection::Send,
        stage,
        label: &label,
        transaction_id: item.transaction_id(),
        payload: item.carriage(),
    });

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return SendOutcome::Cancelled,
        opened = session.open_send_stream() => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            error!(
                stage,
                session = %session.id(),
                transaction_id = %item.transaction_id(),
                error = %err,
                "failed to open stream to replica, passing item through"
            );
            return pass_through(ctx, replica, item, out).await;
        }
    };

    let bytes = item.encode();
    let written = tokio::select! {
        biased;
        _ = cancel.cancelled() => return SendOutcome::Cancelled,
        written = async {
            stream.write_all(&bytes).await?;
            stream.shutdown().await?;
            Ok::<_, std::io::Error>(())
        } => written,
    };
    if let Err(source) = written {
        let err = TransportError::Io {
            op: TransportOp::Write,
            source,
        };
        error!(
            stage,
            session = %session.id(),
            transaction_id = %item.transaction_id(),
            error = %err,
            "failed to write item to replica, dropping"
        );
        replica.cancel();
        return SendOutcome::Dropped;
    }

    debug!(
        stage,
        session = %session.id(),
        transaction_id = %item.transaction_id(),
        bytes = bytes.len(),
        "item delivered to replica"
    );
    span.end();
    SendOutcome::Delivered
}

async fn pass_through<S>(
    ctx: &PipelineContext,
    replica: &Replica<S>,
    item: DataFrame,
    out: &mpsc::Sender<DataFrame>,
) -> SendOutcome {
    if !forward(ctx.cancellation(), out, item).await {
        return SendOutcome::Cancelled;
    }
    replica.cancel();
    SendOutcome::PassedThrough
}
