#![doc = r#"
# zipper-transport-quic

## 设计动机（Why）
- zipper 与 stream function 之间的每条连接都是一个多路复用会话：流水线为每条数据打开一条
  出站单向流，副本在同一连接上打开单向流回包。QUIC 单向流天然契合这一模型。
- 流水线只依赖 `zipper_core::Session` 契约，本 crate 以 `quinn` 实现该契约。

## 核心契约（What）
- `QuicEndpoint`：负责 UDP Socket 绑定、监听与发起连接；
- `QuicSession`：一条 QUIC 连接，实现 `Session`，可直接注册到 `ReplicaSet`；
- `QuicError`：端点级错误，携带 `zipper.transport.quic.*` 稳定错误码。

## 风险与注意（Trade-offs）
- 证书管理由调用侧提供；
- 握手帧交换、鉴权与路由元数据不在本层处理，连接建立后即视为可用副本。
"#]

mod endpoint;
mod error;
mod session;

pub use endpoint::QuicEndpoint;
pub use error::{OperationKind, QuicError};
pub use session::QuicSession;
