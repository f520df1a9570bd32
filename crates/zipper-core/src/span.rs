//! 发送/接收路径上的可选追踪钩子。
//!
//! 流水线在每次发送与每次收到回包时各开一个 Span，纯粹用于观测：钩子缺失、返回空守卫或内部
//! 失败都不得改变数据路径的行为。

use zipper_frame::TransactionId;

/// Span 所处的数据方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanDirection {
    /// 发往副本。
    Send,
    /// 来自副本的回包。
    Receive,
}

impl SpanDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            SpanDirection::Send => "send",
            SpanDirection::Receive => "receive",
        }
    }
}

/// 创建 Span 所需的参数。
#[derive(Clone, Copy, Debug)]
pub struct SpanRequest<'a> {
    pub direction: SpanDirection,
    /// 所属阶段名。
    pub stage: &'a str,
    /// Span 名称，例如 `zipper-send-to-<stage>`。
    pub label: &'a str,
    pub transaction_id: &'a TransactionId,
    pub payload: &'a [u8],
}

/// 追踪钩子。
///
/// # 教案式说明
/// - **意图（Why）**：让追踪后端（OpenTelemetry 或其它）以插件形式接入，核心不依赖任何导出器；
/// - **契约（What）**：`start` 必须立即返回且不可 panic；返回的 [`SpanGuard`] 在 `end` 或 Drop
///   时结束 Span；
/// - **实现参考**：`zipper-otel::OtelSpanHook`。
pub trait SpanHook: Send + Sync + 'static {
    fn start(&self, request: &SpanRequest<'_>) -> SpanGuard;
}

/// 结束 Span 的回调对象，由具体追踪后端实现。
pub trait SpanFinish: Send {
    fn finish(self: Box<Self>);
}

/// Span 守卫：`end` 或 Drop 时恰好结束一次。
#[must_use = "dropping the guard ends the span immediately"]
pub struct SpanGuard {
    inner: Option<Box<dyn SpanFinish>>,
}

impl SpanGuard {
    pub fn new(finish: Box<dyn SpanFinish>) -> Self {
        Self {
            inner: Some(finish),
        }
    }

    /// 不关联任何后端的空守卫。
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.finish();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

impl core::fmt::Debug for SpanGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpanGuard")
            .field("active", &self.inner.is_some())
            .finish()
    }
}

/// 默认钩子：不产生任何 Span。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSpanHook;

impl SpanHook for NoopSpanHook {
    fn start(&self, _request: &SpanRequest<'_>) -> SpanGuard {
        SpanGuard::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    struct CountingFinish(Arc<AtomicUsize>);

    impl SpanFinish for CountingFinish {
        fn finish(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_finishes_exactly_once() {
        let ended = Arc::new(AtomicUsize::new(0));
        let guard = SpanGuard::new(Box::new(CountingFinish(ended.clone())));
        guard.end();
        assert_eq!(ended.load(Ordering::SeqCst), 1);

        {
            let _guard = SpanGuard::new(Box::new(CountingFinish(ended.clone())));
        }
        assert_eq!(ended.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn noop_hook_returns_empty_guard() {
        let tid = TransactionId::from("t");
        let guard = NoopSpanHook.start(&SpanRequest {
            direction: SpanDirection::Send,
            stage: "s",
            label: "zipper-send-to-s",
            transaction_id: &tid,
            payload: b"x",
        });
        assert!(guard.is_noop());
    }
}
