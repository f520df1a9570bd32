use std::borrow::Cow;

use opentelemetry::{
    KeyValue,
    trace::{Span as _, SpanKind, Tracer as _},
};
use opentelemetry_sdk::trace::{Span, Tracer};
use zipper_core::{SpanDirection, SpanFinish, SpanGuard, SpanHook, SpanRequest};

/// Span 属性键。
pub mod keys {
    pub const ATTR_STAGE: &str = "zipper.stage";
    pub const ATTR_LABEL: &str = "zipper.label";
    pub const ATTR_DIRECTION: &str = "zipper.direction";
    pub const ATTR_TRANSACTION_ID: &str = "zipper.transaction_id";
    pub const ATTR_PAYLOAD_SIZE: &str = "zipper.payload.size";
}

/// OpenTelemetry 版本的追踪钩子。
///
/// # 教案式说明
/// - **意图（Why）**：流水线在每次发送与每次收到回包时调用钩子，本实现把这两类事件记录为
///   OpenTelemetry Span，交由安装的 Provider 导出；
/// - **逻辑（How）**：Span 名取 `SpanRequest::label`（如 `zipper-send-to-<stage>`），发送方向记为
///   `Producer`、回包方向记为 `Consumer`，并附带阶段、事务 ID 与载荷长度属性；返回的
///   [`SpanGuard`] 在结束时调用 `Span::end`；
/// - **契约（What）**：从不 panic，也不影响数据路径。
#[derive(Clone, Debug)]
pub struct OtelSpanHook {
    tracer: Tracer,
}

impl OtelSpanHook {
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }
}

impl SpanHook for OtelSpanHook {
    fn start(&self, request: &SpanRequest<'_>) -> SpanGuard {
        let mut builder = self
            .tracer
            .span_builder(Cow::Owned(request.label.to_string()));
        builder.span_kind = Some(span_kind(request.direction));
        builder.attributes = Some(vec![
            KeyValue::new(keys::ATTR_STAGE, request.stage.to_string()),
            KeyValue::new(keys::ATTR_LABEL, request.label.to_string()),
            KeyValue::new(keys::ATTR_DIRECTION, request.direction.as_str()),
            KeyValue::new(
                keys::ATTR_TRANSACTION_ID,
                request.transaction_id.as_str().to_string(),
            ),
            KeyValue::new(keys::ATTR_PAYLOAD_SIZE, request.payload.len() as i64),
        ]);
        let span = self.tracer.build(builder);
        SpanGuard::new(Box::new(OtelSpanGuard { span }))
    }
}

/// 持有 OpenTelemetry Span，结束时调用 `Span::end`。
struct OtelSpanGuard {
    span: Span,
}

impl SpanFinish for OtelSpanGuard {
    fn finish(mut self: Box<Self>) {
        self.span.end();
    }
}

pub(crate) fn span_kind(direction: SpanDirection) -> SpanKind {
    match direction {
        SpanDirection::Send => SpanKind::Producer,
        SpanDirection::Receive => SpanKind::Consumer,
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::TracerProvider;
    use zipper_core::TransactionId;

    use super::*;

    #[test]
    fn directions_map_to_messaging_kinds() {
        assert_eq!(span_kind(SpanDirection::Send), SpanKind::Producer);
        assert_eq!(span_kind(SpanDirection::Receive), SpanKind::Consumer);
    }

    #[test]
    fn hook_returns_an_active_guard() {
        let provider = TracerProvider::builder().build();
        let hook = OtelSpanHook::new(provider.tracer("zipper-test"));
        let tid = TransactionId::from("tid-1");
        let guard = hook.start(&SpanRequest {
            direction: SpanDirection::Send,
            stage: "sfn",
            label: "zipper-send-to-sfn",
            transaction_id: &tid,
            payload: b"abc",
        });
        assert!(!guard.is_noop());
        guard.end();
    }
}
