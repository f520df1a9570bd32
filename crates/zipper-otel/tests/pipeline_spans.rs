#![cfg(feature = "test-util")]

use std::{sync::Arc, time::Duration};

use opentelemetry::{Value, trace::SpanKind};
use tokio::io::{AsyncWriteExt, duplex};
use zipper_core::{
    DataFrame, PipelineBuilder, ReplicaSet, SessionDirectory, test_stubs::MockSession,
};
use zipper_otel::keys;

fn attribute(span: &opentelemetry_sdk::export::trace::SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

/// 一次回显往返应产生一对 send/receive Span，且属性完整。
#[tokio::test(flavor = "multi_thread")]
async fn echo_round_trip_exports_send_and_receive_spans() {
    zipper_otel::install().expect("install zipper-otel");
    zipper_otel::testing::reset();
    let hook = zipper_otel::span_hook().expect("hook installed");

    let directory = Arc::new(SessionDirectory::default());
    let replicas = ReplicaSet::new("echo", directory.clone());
    let (session, peer) = MockSession::pair("echo-0");
    replicas.register(session).expect("register replica");
    let _echo = peer.spawn_echo();

    let (mut writer, reader) = duplex(64 * 1024);
    let mut pipeline = PipelineBuilder::new(directory)
        .span_hook(hook)
        .stage(replicas.descriptor())
        .build(reader)
        .expect("valid config");

    let request = DataFrame::with_generated_id(0x10, "ping");
    writer.write_all(&request.encode()).await.expect("write");
    let reply = tokio::time::timeout(Duration::from_secs(2), pipeline.recv())
        .await
        .expect("reply in time")
        .expect("pipeline open");
    assert_eq!(reply, request);

    let spans = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            zipper_otel::testing::force_flush();
            let spans = zipper_otel::testing::stage_spans("echo");
            if spans.len() >= 2 {
                return spans;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("spans exported");

    let send = spans
        .iter()
        .find(|span| span.name == "zipper-send-to-echo")
        .expect("send span");
    assert_eq!(send.span_kind, SpanKind::Producer);
    assert_eq!(
        attribute(send, keys::ATTR_STAGE),
        Some(Value::from("echo"))
    );
    assert_eq!(
        attribute(send, keys::ATTR_TRANSACTION_ID),
        Some(Value::from(request.transaction_id().as_str().to_string()))
    );
    assert_eq!(
        attribute(send, keys::ATTR_PAYLOAD_SIZE),
        Some(Value::I64(4))
    );

    let receive = spans
        .iter()
        .find(|span| span.name == "zipper-receive-from-echo")
        .expect("receive span");
    assert_eq!(receive.span_kind, SpanKind::Consumer);

    pipeline.shutdown().await;
    assert!(matches!(
        zipper_otel::install(),
        Err(zipper_otel::Error::AlreadyInstalled)
    ));
}
