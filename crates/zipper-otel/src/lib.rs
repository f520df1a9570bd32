//! # zipper-otel
//!
//! ## 定位（Why）
//! - 为 zipper 流水线提供“一次安装即可用”的观测能力：`tracing` 日志输出、OpenTelemetry Span
//!   导出，以及可直接交给流水线构造器的 [`OtelSpanHook`]；
//! - 流水线核心只依赖 `zipper_core::SpanHook` 契约，本 crate 是其 OpenTelemetry 实现。
//!
//! ## 使用方式（How）
//! ```ignore
//! zipper_otel::install()?;
//! let pipeline = PipelineBuilder::new(directory)
//!     .span_hook(zipper_otel::span_hook().expect("installed"))
//!     .stage(stage)
//!     .build(inbound)?;
//! ```
//!
//! ## 契约（What）
//! - [`install`] 每个进程只能成功一次；外部已设置全局 `tracing` Subscriber 时拒绝安装；
//! - 日志过滤沿用 `RUST_LOG`，未设置时默认 `info`；
//! - 启用 `test-util` 特性时 Provider 额外挂载内存导出器，经 [`testing`] 模块读取。

mod hook;

use std::sync::{Arc, OnceLock};

use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_sdk::{
    Resource,
    trace::{self, TracerProvider},
};
use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};
use zipper_core::SpanHook;

pub use hook::{OtelSpanHook, keys};

#[cfg(feature = "test-util")]
use opentelemetry_sdk::export::trace::SpanData;
#[cfg(feature = "test-util")]
use test_support::InMemorySpanExporter;

/// 追踪器名称，同时作为日志中的 instrumentation scope。
pub const TRACER_NAME: &str = "zipper.pipeline";

static INSTALL_STATE: OnceLock<InstallState> = OnceLock::new();

/// 安装过程可能出现的错误。
#[derive(Debug, Error)]
pub enum Error {
    /// [`install`] 被重复调用。
    #[error("zipper-otel is already installed")]
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 设置全局 Subscriber 失败的底层错误。
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
}

/// 安装后的持久状态，保持 Provider 与钩子在进程生命周期内有效。
struct InstallState {
    #[cfg_attr(not(feature = "test-util"), allow(dead_code))]
    provider: TracerProvider,
    hook: Arc<OtelSpanHook>,
}

/// 零配置安装入口：构建 Provider、注册 `fmt + EnvFilter + OpenTelemetry` 三层 Subscriber。
///
/// # 教案式说明
/// - **逻辑（How）**：
///   1. 拒绝重复安装与外部已设置的 Subscriber；
///   2. 构建 `TracerProvider` 并注册到 `opentelemetry::global`；
///   3. 组装 `tracing-subscriber` 注册表并设为全局默认；
///   4. 以同一 Tracer 构造 [`OtelSpanHook`]，写入安装状态。
/// - **契约（What）**：成功后 [`span_hook`] 返回 `Some`。
pub fn install() -> Result<(), Error> {
    if INSTALL_STATE.get().is_some() {
        return Err(Error::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(Error::SubscriberAlreadySet);
    }

    let state = install_impl()?;
    INSTALL_STATE
        .set(state)
        .map_err(|_| Error::AlreadyInstalled)
}

/// 已安装的追踪钩子，可直接交给 `PipelineBuilder::span_hook`。
pub fn span_hook() -> Option<Arc<dyn SpanHook>> {
    INSTALL_STATE
        .get()
        .map(|state| state.hook.clone() as Arc<dyn SpanHook>)
}

fn install_impl() -> Result<InstallState, Error> {
    let provider = build_tracer_provider();
    global::set_tracer_provider(provider.clone());

    let tracer = provider.versioned_tracer(
        TRACER_NAME,
        Some(env!("CARGO_PKG_VERSION")),
        None::<&'static str>,
        None,
    );

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer.clone()));
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(InstallState {
        provider,
        hook: Arc::new(OtelSpanHook::new(tracer)),
    })
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn build_tracer_provider() -> TracerProvider {
    #[allow(unused_mut)]
    let mut builder = TracerProvider::builder().with_config(
        trace::config()
            .with_sampler(trace::Sampler::AlwaysOn)
            .with_resource(Resource::default()),
    );

    #[cfg(feature = "test-util")]
    {
        builder = builder.with_simple_exporter(fetch_in_memory_exporter());
    }

    builder.build()
}

#[cfg(feature = "test-util")]
fn fetch_in_memory_exporter() -> InMemorySpanExporter {
    static EXPORTER: OnceLock<InMemorySpanExporter> = OnceLock::new();
    EXPORTER.get_or_init(InMemorySpanExporter::default).clone()
}

#[cfg(feature = "test-util")]
mod test_support {
    use std::sync::Arc;

    use futures_util::future::BoxFuture;
    use opentelemetry::Value;
    use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
    use parking_lot::Mutex;

    use crate::keys;

    /// 流水线 Span 的内存收集器。
    ///
    /// 以 `simple_exporter` 方式挂到 Provider 上，send/receive Span 结束即追加进缓冲；
    /// 测试按阶段名取回 Span 断言名称、种类与属性。
    #[derive(Clone, Debug, Default)]
    pub struct InMemorySpanExporter {
        spans: Arc<Mutex<Vec<SpanData>>>,
    }

    impl InMemorySpanExporter {
        pub fn snapshot(&self) -> Vec<SpanData> {
            self.spans.lock().clone()
        }

        /// 只保留 `zipper.stage` 属性等于 `stage` 的 Span。
        pub fn for_stage(&self, stage: &str) -> Vec<SpanData> {
            let expected = Value::from(stage.to_string());
            self.spans
                .lock()
                .iter()
                .filter(|span| {
                    span.attributes
                        .iter()
                        .any(|kv| kv.key.as_str() == keys::ATTR_STAGE && kv.value == expected)
                })
                .cloned()
                .collect()
        }

        pub fn clear(&self) {
            self.spans.lock().clear();
        }
    }

    impl SpanExporter for InMemorySpanExporter {
        fn export(&mut self, mut batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
            self.spans.lock().append(&mut batch);
            Box::pin(async { Ok(()) })
        }

        fn shutdown(&mut self) {
            self.clear();
        }
    }
}

/// 测试辅助：读取 [`install`] 之后流水线产生的 Span。
#[cfg(feature = "test-util")]
pub mod testing {
    use super::*;

    pub use super::test_support::InMemorySpanExporter;

    /// 刷新 Provider；`simple_exporter` 下 Span 结束即导出，这里只兜住尚在处理中的批次。
    pub fn force_flush() {
        if let Some(state) = INSTALL_STATE.get() {
            for result in state.provider.force_flush() {
                if let Err(err) = result {
                    tracing::debug!(error = %err, "span flush failed");
                }
            }
        }
    }

    pub fn finished_spans() -> Vec<SpanData> {
        fetch_in_memory_exporter().snapshot()
    }

    /// 某个阶段的 send/receive Span。
    pub fn stage_spans(stage: &str) -> Vec<SpanData> {
        fetch_in_memory_exporter().for_stage(stage)
    }

    pub fn reset() {
        fetch_in_memory_exporter().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_hook_is_absent_before_install() {
        if INSTALL_STATE.get().is_none() {
            assert!(span_hook().is_none());
        }
    }

    #[test]
    fn errors_render_readable_messages() {
        assert_eq!(
            Error::AlreadyInstalled.to_string(),
            "zipper-otel is already installed"
        );
        assert_eq!(
            Error::SubscriberAlreadySet.to_string(),
            "a global tracing subscriber is already set"
        );
    }
}
