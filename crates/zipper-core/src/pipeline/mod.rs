//! # pipeline 模块说明
//!
//! ## 角色定位（Why）
//! - 把“源读取 → 阶段₁ → … → 阶段ₙ → 调用方”串成一条由有界通道连接的流水线；
//! - 阶段 N 的输出通道恰好就是阶段 N+1 的输入通道，任一阶段的慢副本只会通过通道容量
//!   反压到上游，不会阻塞其它副本。
//!
//! ## 子模块（Where）
//! - `source`：从入站流逐帧读取，只放行数据帧；
//! - `dispatch`：阶段内的轮询分发器；
//! - `send`：单个副本的发送路径（透传、注销、丢弃三种恢复策略）；
//! - `receive`：阶段回包接收器与单子流读取单元；
//! - `stage`：阶段编排与输出通道关闭时机。
//!
//! ## 并发契约（What）
//! - 所有任务登记在 [`PipelineContext`] 持有的同一个 [`TaskTracker`] 上；
//! - 所有阻塞点都与 [`CancellationToken`] 竞争，取消后不再向任何通道写入数据。

mod dispatch;
mod receive;
mod send;
mod source;
mod stage;

use std::{fmt, sync::Arc, time::Duration};

use tokio::{io::AsyncRead, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::warn;
use zipper_frame::DataFrame;

use crate::{
    config::ZipperConfig,
    directory::SessionDirectory,
    error::ConfigError,
    replica::StageDescriptor,
    span::{NoopSpanHook, SpanHook},
    transport::Session,
};

pub use dispatch::{RoundRobinDispatcher, Route, Selection};
pub use receive::{read_one, receive_replies};
pub use send::{SendOutcome, send_to_replica};
pub use source::read_source;
pub use stage::pipe_stage;

/// 流水线任务共享的运行上下文。
///
/// - `cancel`：当前作用域的取消令牌（阶段内为流水线令牌的子令牌）；
/// - `tasks`：整条流水线的任务追踪器；
/// - `sends`：当前阶段的在途发送追踪器，阶段据此判断“上游结束后发送是否全部完成”。
#[derive(Clone)]
pub struct PipelineContext {
    cancel: CancellationToken,
    tasks: TaskTracker,
    sends: TaskTracker,
    hook: Arc<dyn SpanHook>,
    channel_capacity: usize,
    max_frame_size: usize,
    reply_linger: Duration,
}

impl PipelineContext {
    /// `config` 应已通过 [`ZipperConfig::validate`]；直接传入零通道容量时按 1 处理并告警，
    /// 因为零容量的 `mpsc` 通道无法创建。
    pub fn new(config: &ZipperConfig, cancel: CancellationToken, hook: Arc<dyn SpanHook>) -> Self {
        if config.channel_capacity == 0 {
            warn!("channel_capacity is zero, using 1");
        }
        Self {
            cancel,
            tasks: TaskTracker::new(),
            sends: TaskTracker::new(),
            hook,
            channel_capacity: config.channel_capacity.max(1),
            max_frame_size: config.max_frame_size,
            reply_linger: config.reply_linger(),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn hook(&self) -> &dyn SpanHook {
        self.hook.as_ref()
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn reply_linger(&self) -> Duration {
        self.reply_linger
    }

    /// 创建一条按配置容量的数据通道。
    pub fn channel(&self) -> (mpsc::Sender<DataFrame>, mpsc::Receiver<DataFrame>) {
        mpsc::channel(self.channel_capacity)
    }

    /// 派生阶段作用域：子取消令牌与独立的在途发送追踪器，共享任务追踪器与钩子。
    pub fn stage_scope(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            sends: TaskTracker::new(),
            ..self.clone()
        }
    }

    pub(crate) fn sends(&self) -> &TaskTracker {
        &self.sends
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("tasks", &self.tasks.len())
            .field("sends", &self.sends.len())
            .field("channel_capacity", &self.channel_capacity)
            .field("max_frame_size", &self.max_frame_size)
            .field("reply_linger", &self.reply_linger)
            .finish()
    }
}

/// 在取消令牌约束下把一帧写入通道。
///
/// 返回 `false` 表示帧未写入：令牌已取消或接收端已释放。
pub(crate) async fn forward(
    cancel: &CancellationToken,
    out: &mpsc::Sender<DataFrame>,
    item: DataFrame,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = out.send(item) => sent.is_ok(),
    }
}

/// 组装完成、正在运行的流水线。
///
/// 输出通道关闭即流水线结束；单条数据的失败从不出现在这里。
#[derive(Debug)]
pub struct Pipeline {
    output: mpsc::Receiver<DataFrame>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Pipeline {
    /// 读取下一条合并后的输出；`None` 表示所有阶段都已结束。
    pub async fn recv(&mut self) -> Option<DataFrame> {
        self.output.recv().await
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// 取消并等待全部任务退出。
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub fn into_parts(self) -> (mpsc::Receiver<DataFrame>, CancellationToken, TaskTracker) {
        (self.output, self.cancel, self.tasks)
    }
}

/// 流水线构造器。
///
/// # 教案式说明
/// - **意图（Why）**：[`build_pipeline`] 覆盖最常见的“默认配置 + 无追踪”场景，需要调参或
///   接入追踪后端时使用构造器；
/// - **契约（What）**：
///   - 阶段按 `stage` 调用顺序串联；零阶段时输出即源读取结果；
///   - [`build`](Self::build) 先执行 [`ZipperConfig::validate`]，非法配置以
///     [`ConfigError`] 返回；合法时立即派生任务，必须在 Tokio 运行时内调用；
///   - 未指定取消令牌时新建一个，可经 [`Pipeline::cancellation`] 取得。
pub struct PipelineBuilder<S> {
    directory: Arc<SessionDirectory<S>>,
    config: ZipperConfig,
    hook: Arc<dyn SpanHook>,
    cancel: Option<CancellationToken>,
    stages: Vec<Arc<dyn StageDescriptor<S>>>,
}

impl<S: Session> PipelineBuilder<S> {
    pub fn new(directory: Arc<SessionDirectory<S>>) -> Self {
        Self {
            directory,
            config: ZipperConfig::default(),
            hook: Arc::new(NoopSpanHook),
            cancel: None,
            stages: Vec::new(),
        }
    }

    pub fn config(mut self, config: ZipperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn span_hook(mut self, hook: Arc<dyn SpanHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn stage(mut self, stage: Arc<dyn StageDescriptor<S>>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Arc<dyn StageDescriptor<S>>>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// 校验配置后立即派生全部任务；配置非法时不派生任何任务。
    pub fn build<R>(self, inbound: R) -> Result<Pipeline, ConfigError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.config.validate()?;
        Ok(self.assemble(inbound))
    }

    fn assemble<R>(self, inbound: R) -> Pipeline
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let cancel = self.cancel.unwrap_or_else(CancellationToken::new);
        let ctx = PipelineContext::new(&self.config, cancel.clone(), self.hook);
        let mut output = read_source(&ctx, inbound);
        for stage in self.stages {
            output = pipe_stage(&ctx, Arc::clone(&self.directory), stage, output);
        }
        Pipeline {
            output,
            cancel,
            tasks: ctx.tasks.clone(),
        }
    }
}

impl<S> fmt::Debug for PipelineBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// 以默认配置与空追踪钩子组装流水线。
pub fn build_pipeline<S, R>(
    cancel: CancellationToken,
    directory: Arc<SessionDirectory<S>>,
    stages: impl IntoIterator<Item = Arc<dyn StageDescriptor<S>>>,
    inbound: R,
) -> Pipeline
where
    S: Session,
    R: AsyncRead + Unpin + Send + 'static,
{
    // 默认配置恒合法，无需校验。
    PipelineBuilder::new(directory)
        .cancellation(cancel)
        .stages(stages)
        .assemble(inbound)
}
