//! 流水线消费的传输会话契约。

use std::borrow::Cow;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// 支持单向子流多路复用的传输会话（一个副本对应一个会话）。
///
/// # 教案式说明
/// - **意图（Why）**：发送路径为每条数据打开一条新的出站单向子流，写完即半关闭；回包经由
///   副本主动打开的入站单向子流送回。流水线只依赖这两个能力，不关心底层是 QUIC 还是其它
///   多路复用传输；
/// - **契约（What）**：
///   - `open_send_stream`：打开出站子流；写入后调用 `AsyncWrite::shutdown` 即视为关闭写端；
///   - `accept_recv_stream`：等待下一条入站子流；连接关闭时必须返回
///     [`TransportError::ConnectionClosed`]，其它失败返回别的变体；
///   - 两个方法都必须是取消安全的：调用方会在 `tokio::select!` 中丢弃其 Future；
///   - `id`：仅用于日志。
#[async_trait]
pub trait Session: Send + Sync + 'static {
    type SendStream: AsyncWrite + Unpin + Send + 'static;
    type RecvStream: AsyncRead + Unpin + Send + 'static;

    async fn open_send_stream(&self) -> Result<Self::SendStream, TransportError>;

    async fn accept_recv_stream(&self) -> Result<Self::RecvStream, TransportError>;

    fn id(&self) -> Cow<'_, str>;
}
