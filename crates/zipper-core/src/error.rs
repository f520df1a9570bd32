//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 流水线对调用方不暴露任何逐条数据的失败：丢弃或透传都在本地消化，输出通道关闭是唯一
//!   可见的“失败”。因此这里的错误类型只服务于三个边界：传输会话、会话目录与配置加载。
//!
//! ## 设计要求（What）
//! - 所有错误均派生 `thiserror::Error`；
//! - [`TransportError::ConnectionClosed`] 必须与其它错误可区分，accept 循环据此决定是否静默退出。

use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

/// 传输会话操作的种类，用于错误上下文。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportOp {
    OpenStream,
    AcceptStream,
    Write,
}

impl TransportOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportOp::OpenStream => "open_stream",
            TransportOp::AcceptStream => "accept_stream",
            TransportOp::Write => "write",
        }
    }
}

/// 传输会话错误。
///
/// # 教案式说明
/// - **意图（Why）**：接收路径需要把“连接正常关闭”与“真实故障”分流：前者静默结束 accept
///   循环，后者记录错误日志后同样结束；
/// - **契约（What）**：实现 [`Session`](crate::Session) 的传输必须把所有“连接已关闭”类错误
///   （本端关闭、对端应用关闭、连接被关闭）映射为 [`TransportError::ConnectionClosed`]。
#[derive(Debug, Error)]
pub enum TransportError {
    /// 连接已关闭，属于预期的生命周期结束。
    #[error("connection closed")]
    ConnectionClosed,

    /// 操作失败，`detail` 为底层传输给出的描述。
    #[error("{} failed: {detail}", .op.as_str())]
    Failed { op: TransportOp, detail: String },

    /// 底层 IO 失败。
    #[error("{} io failed: {source}", .op.as_str())]
    Io {
        op: TransportOp,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub fn failed(op: TransportOp, detail: impl Into<String>) -> Self {
        TransportError::Failed {
            op,
            detail: detail.into(),
        }
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, TransportError::ConnectionClosed)
    }
}

/// 会话目录错误。
///
/// 目录队列满时由写入方（连接接入方）决定丢弃或重试，目录本身不做兜底。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("session queue for stage `{stage}` is full")]
    QueueFull { stage: Arc<str> },

    #[error("session queue for stage `{stage}` is closed")]
    QueueClosed { stage: Arc<str> },
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_closed_is_distinguishable() {
        assert!(TransportError::ConnectionClosed.is_connection_closed());
        assert!(!TransportError::failed(TransportOp::AcceptStream, "reset").is_connection_closed());
    }

    #[test]
    fn failed_message_names_the_operation() {
        let err = TransportError::failed(TransportOp::OpenStream, "stream limit reached");
        assert_eq!(err.to_string(), "open_stream failed: stream limit reached");
    }
}
