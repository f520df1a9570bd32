//! 回包接收：目录 → 会话 accept 循环 → 单子流读取单元。

use std::sync::Arc;

use tokio::{io::AsyncRead, sync::mpsc};
use tracing::{debug, error};
use zipper_frame::{DataFrame, read_frame};

use super::{PipelineContext, forward};
use crate::{
    directory::SessionDirectory,
    span::{SpanDirection, SpanRequest},
    transport::Session,
};

/// 阶段回包接收器，运行到取消或目录队列关闭为止。
///
/// 每个出现在目录中的会话获得独立的 accept 循环任务；空条目被忽略。
pub async fn receive_replies<S: Session>(
    ctx: PipelineContext,
    stage: Arc<str>,
    directory: Arc<SessionDirectory<S>>,
    out: mpsc::Sender<DataFrame>,
) {
    let queue = directory.load_or_create(&stage);
    loop {
        let entry = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => break,
            entry = queue.next() => entry,
        };
        match entry {
            None => {
                debug!(stage = %stage, "session queue closed");
                break;
            }
            Some(None) => continue,
            Some(Some(session)) => {
                debug!(stage = %stage, session = %session.id(), "watching session for replies");
                ctx.tasks().spawn(accept_streams(
                    ctx.clone(),
                    stage.clone(),
                    session,
                    out.clone(),
                ));
            }
        }
    }
}

async fn accept_streams<S: Session>(
    ctx: PipelineContext,
    stage: Arc<str>,
    session: Arc<S>,
    out: mpsc::Sender<DataFrame>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => return,
            accepted = session.accept_recv_stream() => accepted,
        };
        match accepted {
            Ok(stream) => {
                ctx.tasks()
                    .spawn(read_one(ctx.clone(), stage.clone(), stream, out.clone()));
            }
            Err(err) if err.is_connection_closed() => {
                debug!(stage = %stage, session = %session.id(), "session closed");
                return;
            }
            Err(err) => {
                error!(
                    stage = %stage,
                    session = %session.id(),
                    error = %err,
                    "failed to accept reply stream"
                );
                return;
            }
        }
    }
}

/// 从一条入站子流读取恰好一帧：数据帧转发，其余情况记录后退出。
pub async fn read_one<R>(
    ctx: PipelineContext,
    stage: Arc<str>,
    mut stream: R,
    out: mpsc::Sender<DataFrame>,
) where
    R: AsyncRead + Unpin + Send,
{
    let frame = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => return,
        frame = read_frame(&mut stream, ctx.max_frame_size()) => frame,
    };
    let frame = match frame {
        Ok(frame) => frame,
        Err(err) if err.is_eof() => {
            debug!(stage = %stage, "reply stream closed without a frame");
            return;
        }
        Err(err) => {
            error!(stage = %stage, error = %err, "failed to read reply frame");
            return;
        }
    };
    let item = match frame.into_data() {
        Ok(item) => item,
        Err(other) => {
            debug!(stage = %stage, tag = %other.tag(), "ignoring non-data reply frame");
            return;
        }
    };

    let label = format!("zipper-receive-from-{stage}");
    let span = ctx.hook().start(&SpanRequest {
        direction: SpanDirection::Receive,
        stage: &stage,
        label: &label,
        transaction_id: item.transaction_id(),
        payload: item.carriage(),
    });
    let transaction_id = item.transaction_id().clone();
    if forward(ctx.cancellation(), &out, item).await {
        debug!(stage = %stage, transaction_id = %transaction_id, "reply forwarded");
    }
    span.end();
}
