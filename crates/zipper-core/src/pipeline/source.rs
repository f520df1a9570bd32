//! 源读取：把入站字节流切分为帧，只把数据帧送入流水线。

use tokio::{io::AsyncRead, sync::mpsc};
use tracing::{debug, error};
use zipper_frame::{DataFrame, read_frame};

use super::{PipelineContext, forward};

/// 启动源读取任务并返回其输出通道。
///
/// # 契约说明（What）
/// - 每次读取恰好一帧；解析失败视为流结束，不重试。干净的 EOF 以 `debug` 记录，其它错误以
///   `error` 记录；
/// - 数据帧写入输出通道，通道满时阻塞读取循环，背压由此传递到传输层；
/// - 非数据帧记录后丢弃；
/// - 读取与写入都与取消令牌竞争；任务退出时输出通道随唯一的发送端一起关闭。
pub fn read_source<R>(ctx: &PipelineContext, inbound: R) -> mpsc::Receiver<DataFrame>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = ctx.channel();
    let cancel = ctx.cancellation().clone();
    let max_frame_size = ctx.max_frame_size();
    ctx.tasks().spawn(async move {
        let mut inbound = inbound;
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("source reader cancelled");
                    break;
                }
                frame = read_frame(&mut inbound, max_frame_size) => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) if err.is_eof() => {
                    debug!("source stream finished");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed to read frame from source");
                    break;
                }
            };
            match frame.into_data() {
                Ok(item) => {
                    debug!(transaction_id = %item.transaction_id(), "source frame received");
                    if !forward(&cancel, &tx, item).await {
                        break;
                    }
                }
                Err(other) => {
                    debug!(tag = %other.tag(), "dropping non-data frame from source");
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncWriteExt, duplex};
    use tokio_util::sync::CancellationToken;
    use zipper_frame::Frame;

    use super::*;
    use crate::{config::ZipperConfig, span::NoopSpanHook};

    fn context() -> PipelineContext {
        PipelineContext::new(
            &ZipperConfig::default(),
            CancellationToken::new(),
            Arc::new(NoopSpanHook),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn forwards_data_and_drops_control_frames() {
        let ctx = context();
        let (mut writer, reader) = duplex(4096);
        let mut output = read_source(&ctx, reader);

        let first = DataFrame::with_generated_id(0x10, "a");
        let second = DataFrame::with_generated_id(0x10, "b");
        writer.write_all(&first.encode()).await.unwrap();
        writer.write_all(&Frame::Ping.encode()).await.unwrap();
        writer.write_all(&second.encode()).await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        assert_eq!(output.recv().await, Some(first));
        assert_eq!(output.recv().await, Some(second));
        assert_eq!(output.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_input_ends_the_stream() {
        let ctx = context();
        let (mut writer, reader) = duplex(64);
        let mut output = read_source(&ctx, reader);
        writer.write_all(&[0xFF, 0, 0, 0, 0]).await.unwrap();
        assert_eq!(output.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_interrupts_a_pending_read() {
        let ctx = context();
        let (_writer, reader) = duplex(64);
        let mut output = read_source(&ctx, reader);
        ctx.cancellation().cancel();
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), output.recv()).await;
        assert_eq!(closed.unwrap(), None);
    }
}
