use std::net::SocketAddr;

use quinn::{ClientConfig, Endpoint, ServerConfig, VarInt};
use tracing::debug;

use crate::{
    error::{ACCEPT, BIND, CONNECT, QuicError},
    session::QuicSession,
};

/// QUIC Endpoint 封装：统一监听与建连入口。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - zipper 一侧监听 stream function 的接入，测试与上游 zipper 一侧主动建连；同一个 UDP
///   Socket 可以同时承担两种角色。
///
/// ## 逻辑（How）
/// - `bind_server`/`bind_client` 调用 `quinn::Endpoint::server/client` 创建底层 Socket；
/// - `accept` 等待入站连接并完成握手，`connect` 使用默认客户端配置发起握手；
/// - 两者都返回可直接交给流水线的 [`QuicSession`]。
///
/// ## 契约（What）
/// - 必须在 Tokio 运行时中调用；
/// - `accept` 仅服务端模式可用，Endpoint 关闭后返回 [`QuicError::EndpointClosed`]；
/// - 握手与认证（`Handshake` 帧交换）不在本层处理。
#[derive(Clone, Debug)]
pub struct QuicEndpoint {
    endpoint: Endpoint,
    mode: EndpointMode,
    local_addr: SocketAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EndpointMode {
    Server,
    Client,
}

impl QuicEndpoint {
    pub fn bind_server(
        addr: SocketAddr,
        server_config: ServerConfig,
        client_config: Option<ClientConfig>,
    ) -> Result<Self, QuicError> {
        let mut endpoint = Endpoint::server(server_config, addr)
            .map_err(|source| QuicError::Io { kind: BIND, source })?;
        if let Some(config) = client_config {
            endpoint.set_default_client_config(config);
        }
        Self::finish(endpoint, EndpointMode::Server)
    }

    pub fn bind_client(addr: SocketAddr, client_config: ClientConfig) -> Result<Self, QuicError> {
        let mut endpoint =
            Endpoint::client(addr).map_err(|source| QuicError::Io { kind: BIND, source })?;
        endpoint.set_default_client_config(client_config);
        Self::finish(endpoint, EndpointMode::Client)
    }

    fn finish(endpoint: Endpoint, mode: EndpointMode) -> Result<Self, QuicError> {
        let local_addr = endpoint
            .local_addr()
            .map_err(|source| QuicError::Io { kind: BIND, source })?;
        debug!(%local_addr, ?mode, "quic endpoint bound");
        Ok(Self {
            endpoint,
            mode,
            local_addr,
        })
    }

    /// 接受下一条入站连接。
    pub async fn accept(&self) -> Result<QuicSession, QuicError> {
        if self.mode != EndpointMode::Server {
            return Err(QuicError::InvalidMode { kind: ACCEPT });
        }
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or(QuicError::EndpointClosed { kind: ACCEPT })?;
        let connection = incoming
            .await
            .map_err(|source| QuicError::Connection {
                kind: ACCEPT,
                source,
            })?;
        let session = QuicSession::new(connection);
        debug!(remote = %session.remote_address(), "quic connection accepted");
        Ok(session)
    }

    /// 向 `addr` 发起连接，`server_name` 用于证书校验。
    pub async fn connect(&self, addr: SocketAddr, server_name: &str) -> Result<QuicSession, QuicError> {
        let connecting = self
            .endpoint
            .connect(addr, server_name)
            .map_err(|source| QuicError::Connect {
                kind: CONNECT,
                source,
            })?;
        let connection = connecting.await.map_err(|source| QuicError::Connection {
            kind: CONNECT,
            source,
        })?;
        Ok(QuicSession::new(connection))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 立即关闭全部连接并停止接受新连接。
    pub fn close(&self) {
        self.endpoint.close(VarInt::from_u32(0), b"endpoint closed");
    }

    /// 等待所有连接把已排队的数据发送完毕。
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}
