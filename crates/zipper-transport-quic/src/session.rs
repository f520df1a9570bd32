use std::{borrow::Cow, net::SocketAddr};

use async_trait::async_trait;
use quinn::{Connection, RecvStream, SendStream, VarInt};
use zipper_core::{Session, TransportError, TransportOp};

use crate::error::map_connection_error;

/// 一条 QUIC 连接上的 zipper 会话。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - 流水线对每条数据打开一条新的出站单向流，副本通过对端主动打开的单向流回包；
///   `quinn` 的单向流与此模型一一对应。
///
/// ## 契约（What）
/// - `open_send_stream` → `Connection::open_uni`；`AsyncWrite::shutdown` 即 `finish`；
/// - `accept_recv_stream` → `Connection::accept_uni`；连接关闭类错误映射为
///   [`TransportError::ConnectionClosed`]；
/// - 克隆共享同一条底层连接。
#[derive(Clone, Debug)]
pub struct QuicSession {
    connection: Connection,
    id: String,
}

impl QuicSession {
    pub fn new(connection: Connection) -> Self {
        let id = format!(
            "quic:{}#{}",
            connection.remote_address(),
            connection.stable_id()
        );
        Self { connection, id }
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// 以应用层错误码关闭连接；对端随后的 accept 返回“连接已关闭”。
    pub fn close(&self, code: u32, reason: &[u8]) {
        self.connection.close(VarInt::from_u32(code), reason);
    }

    /// 等待连接关闭。
    pub async fn closed(&self) {
        let _ = self.connection.closed().await;
    }
}

#[async_trait]
impl Session for QuicSession {
    type SendStream = SendStream;
    type RecvStream = RecvStream;

    async fn open_send_stream(&self) -> Result<SendStream, TransportError> {
        self.connection
            .open_uni()
            .await
            .map_err(|err| map_connection_error(TransportOp::OpenStream, err))
    }

    async fn accept_recv_stream(&self) -> Result<RecvStream, TransportError> {
        self.connection
            .accept_uni()
            .await
            .map_err(|err| map_connection_error(TransportOp::AcceptStream, err))
    }

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }
}
