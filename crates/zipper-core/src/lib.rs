#![deny(unsafe_code)]

//! # zipper-core
//!
//! ## 定位与职责（Why）
//! - zipper 位于单个上游数据源与一串有序的下游处理阶段（stream function）之间：从上游读取
//!   数据帧，依次推过每个阶段，在阶段的多个副本间轮询负载均衡，并把各副本异步返回的结果
//!   重新汇聚成一条输出流；
//! - 某个副本不可达时就地恢复（透传或丢弃），不阻塞其它阶段与其它副本。
//!
//! ## 架构嵌入（Where）
//! - `transport`：流水线消费的会话契约（打开/接受单向子流）；
//! - `directory`：阶段名 → 新会话队列的注册表，由连接接入方写入；
//! - `replica`：副本、阶段描述符与接入侧使用的 [`ReplicaSet`]；
//! - `pipeline`：源读取、轮询分发、发送路径、回包接收与阶段编排；
//! - `span`：可选的追踪钩子；`config`：流水线调优参数；`error`：错误域。
//!
//! ## 并发模型（How）
//! - 每个阶段、每次发送、每个会话的 accept 循环、每个子流的读取都是独立的 Tokio 任务，
//!   全部登记在同一个 [`TaskTracker`](tokio_util::task::TaskTracker) 上；
//! - 任务之间只通过有界通道与每个分发器内的一个原子计数器同步；
//! - 单一 [`CancellationToken`](tokio_util::sync::CancellationToken) 自顶向下传播取消。

pub mod config;
pub mod directory;
pub mod error;
pub mod pipeline;
pub mod replica;
pub mod span;
pub mod test_stubs;
pub mod transport;

pub use config::ZipperConfig;
pub use directory::{SessionDirectory, SessionQueue};
pub use error::{ConfigError, DirectoryError, TransportError, TransportOp};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineContext, Route, RoundRobinDispatcher, Selection,
    SendOutcome, build_pipeline,
};
pub use replica::{Replica, ReplicaId, ReplicaSet, StageDescriptor, StageSnapshot};
pub use span::{NoopSpanHook, SpanDirection, SpanFinish, SpanGuard, SpanHook, SpanRequest};
pub use transport::Session;

pub use zipper_frame::{DataFrame, Frame, FrameError, FrameTag, TransactionId};
