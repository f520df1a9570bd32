use std::io;

use quinn::{ConnectError, ConnectionError};
use thiserror::Error;
use zipper_core::{TransportError, TransportOp};

/// 端点级操作的种类与稳定错误码。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - 端点的绑定、监听与建连失败需要带上稳定的错误码，便于日志检索；
/// - 子流级失败则统一折叠为 `zipper_core::TransportError`，由流水线判断是否为“连接已关闭”。
///
/// ## 契约（What）
/// - 错误码遵循 `zipper.transport.quic.*` 命名；
/// - `quinn` 的错误枚举未来若扩展，需要同步更新 [`map_connection_error`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const BIND: OperationKind = OperationKind {
    code: "zipper.transport.quic.bind_failed",
    message: "quic bind",
};

pub const ACCEPT: OperationKind = OperationKind {
    code: "zipper.transport.quic.accept_failed",
    message: "quic accept",
};

pub const CONNECT: OperationKind = OperationKind {
    code: "zipper.transport.quic.connect_failed",
    message: "quic connect",
};

/// 端点操作错误。
#[derive(Debug, Error)]
pub enum QuicError {
    #[error("{}: {source} ({})", .kind.message, .kind.code)]
    Io {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source} ({})", .kind.message, .kind.code)]
    Connect {
        kind: OperationKind,
        #[source]
        source: ConnectError,
    },

    #[error("{}: {source} ({})", .kind.message, .kind.code)]
    Connection {
        kind: OperationKind,
        #[source]
        source: ConnectionError,
    },

    /// 端点已关闭，不再产生新连接。
    #[error("{}: endpoint closed ({})", .kind.message, .kind.code)]
    EndpointClosed { kind: OperationKind },

    /// 在客户端模式的端点上调用了仅服务端可用的操作。
    #[error("{}: invalid endpoint mode ({})", .kind.message, .kind.code)]
    InvalidMode { kind: OperationKind },
}

impl QuicError {
    pub fn kind(&self) -> OperationKind {
        match self {
            QuicError::Io { kind, .. }
            | QuicError::Connect { kind, .. }
            | QuicError::Connection { kind, .. }
            | QuicError::EndpointClosed { kind }
            | QuicError::InvalidMode { kind } => *kind,
        }
    }
}

/// 连接级错误 → 会话契约错误。
///
/// 本端关闭、对端关闭连接、对端应用层关闭三种情况视为正常的生命周期结束，映射为
/// [`TransportError::ConnectionClosed`]；其余保留描述后映射为 [`TransportError::Failed`]。
pub(crate) fn map_connection_error(op: TransportOp, error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::LocallyClosed
        | ConnectionError::ConnectionClosed(_)
        | ConnectionError::ApplicationClosed(_) => TransportError::ConnectionClosed,
        other => TransportError::failed(op, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_connections_are_lifecycle_ends() {
        let mapped = map_connection_error(TransportOp::AcceptStream, ConnectionError::LocallyClosed);
        assert!(mapped.is_connection_closed());
    }

    #[test]
    fn other_connection_errors_keep_their_description() {
        let mapped = map_connection_error(TransportOp::OpenStream, ConnectionError::TimedOut);
        assert!(!mapped.is_connection_closed());
        assert!(mapped.to_string().starts_with("open_stream failed"));

        let reset = map_connection_error(TransportOp::AcceptStream, ConnectionError::Reset);
        assert!(matches!(reset, TransportError::Failed { .. }));
    }

    #[test]
    fn endpoint_errors_carry_stable_codes() {
        let err = QuicError::InvalidMode { kind: ACCEPT };
        assert_eq!(err.kind(), ACCEPT);
        assert_eq!(
            err.to_string(),
            "quic accept: invalid endpoint mode (zipper.transport.quic.accept_failed)"
        );
    }
}
