//! 基于内存管道的会话测试桩。
//!
//! # 设计定位（Why）
//! - 流水线的单元测试与集成测试都需要一个可控的 [`Session`]：能观察发送路径打开的子流、
//!   能模拟打开/写入失败、能由“副本”一侧主动推送回包；
//! - 这些桩对象集中放在这里，`tests/` 下的集成测试与库内 `#[cfg(test)]` 模块共用一份实现。
//!
//! # 使用方式（How）
//! - [`MockSession::pair`] 返回流水线侧的会话与副本侧的 [`MockPeer`]；
//! - 副本侧通过 [`MockPeer::next_request`] 读取发来的帧，通过 [`MockPeer::reply`] 打开一条
//!   入站子流写回一帧；[`MockPeer::spawn_echo`] 把二者组合为回显副本；
//! - [`CountingCancel`] 构造 `cancel` 调用次数可观测的 [`Replica`]。
//!
//! # 风险提示（Trade-offs）
//! - 子流由 `tokio::io::duplex` 模拟，回包在交给流水线之前已完整写入缓冲区，因此不覆盖
//!   “对端写到一半”的时序。

use std::{
    borrow::Cow,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncWriteExt, DuplexStream, duplex},
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use zipper_frame::{DEFAULT_MAX_FRAME_SIZE, Frame, read_frame};

use crate::{
    error::{TransportError, TransportOp},
    replica::{Replica, ReplicaId},
    transport::Session,
};

const MIN_PIPE_CAPACITY: usize = 64 * 1024;

/// 流水线侧的内存会话。
#[derive(Debug)]
pub struct MockSession {
    id: String,
    requests: mpsc::UnboundedSender<DuplexStream>,
    replies: AsyncMutex<mpsc::UnboundedReceiver<DuplexStream>>,
    closed: CancellationToken,
    fail_open: AtomicBool,
    fail_write: AtomicBool,
    fail_accept: AtomicBool,
    opened: AtomicUsize,
}

impl MockSession {
    /// 创建一对相互连接的会话与副本端。
    pub fn pair(id: impl Into<String>) -> (Arc<MockSession>, MockPeer) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let session = Arc::new(MockSession {
            id: id.into(),
            requests: requests_tx,
            replies: AsyncMutex::new(replies_rx),
            closed: closed.clone(),
            fail_open: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            fail_accept: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
        });
        let peer = MockPeer {
            requests: requests_rx,
            replies: replies_tx,
            closed,
        };
        (session, peer)
    }

    /// 之后的 `open_send_stream` 全部失败。
    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// 之后打开的子流在写入时失败（对端已丢弃）。
    pub fn fail_write(&self) {
        self.fail_write.store(true, Ordering::SeqCst);
    }

    /// 之后的 `accept_recv_stream` 返回非关闭类错误。
    pub fn fail_accept(&self) {
        self.fail_accept.store(true, Ordering::SeqCst);
    }

    /// 关闭连接：挂起与后续的 accept 都返回 [`TransportError::ConnectionClosed`]。
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// 成功打开的出站子流数量。
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    type SendStream = DuplexStream;
    type RecvStream = DuplexStream;

    async fn open_send_stream(&self) -> Result<DuplexStream, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::failed(
                TransportOp::OpenStream,
                "mock open failure",
            ));
        }
        let (local, remote) = duplex(MIN_PIPE_CAPACITY);
        if self.fail_write.load(Ordering::SeqCst) {
            drop(remote);
        } else if self.requests.send(remote).is_err() {
            return Err(TransportError::ConnectionClosed);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(local)
    }

    async fn accept_recv_stream(&self) -> Result<DuplexStream, TransportError> {
        if self.fail_accept.load(Ordering::SeqCst) {
            return Err(TransportError::failed(
                TransportOp::AcceptStream,
                "mock accept failure",
            ));
        }
        let mut replies = self.replies.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransportError::ConnectionClosed),
            next = replies.recv() => next.ok_or(TransportError::ConnectionClosed),
        }
    }

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }
}

/// 副本侧：读取请求、推送回包。
#[derive(Debug)]
pub struct MockPeer {
    requests: mpsc::UnboundedReceiver<DuplexStream>,
    replies: mpsc::UnboundedSender<DuplexStream>,
    closed: CancellationToken,
}

impl MockPeer {
    /// 等待下一条出站子流并解码其中的一帧；会话释放后返回 `None`。
    pub async fn next_request(&mut self) -> Option<Frame> {
        loop {
            let mut stream = self.requests.recv().await?;
            if let Ok(frame) = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).await {
                return Some(frame);
            }
        }
    }

    /// 打开一条入站子流并写入一帧。
    pub async fn reply(&self, frame: &Frame) -> bool {
        self.reply_raw(frame.encode()).await
    }

    /// 打开一条入站子流并写入任意字节（可用于构造畸形回包）。
    pub async fn reply_raw(&self, bytes: Bytes) -> bool {
        let (mut local, remote) = duplex(bytes.len().max(MIN_PIPE_CAPACITY));
        if local.write_all(&bytes).await.is_err() || local.shutdown().await.is_err() {
            return false;
        }
        self.replies.send(remote).is_ok()
    }

    /// 关闭连接。
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// 把副本变成回显服务：每收到一个数据帧就原样写回。
    pub fn spawn_echo(mut self) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut echoed = 0;
            while let Some(frame) = self.next_request().await {
                if frame.is_data() && self.reply(&frame).await {
                    echoed += 1;
                }
            }
            echoed
        })
    }
}

/// 记录 `cancel` 调用次数的副本构造器。
#[derive(Clone, Debug, Default)]
pub struct CountingCancel {
    count: Arc<AtomicUsize>,
}

impl CountingCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replica<S>(&self, id: u64, session: Option<Arc<S>>) -> Replica<S> {
        let count = Arc::clone(&self.count);
        Replica::new(ReplicaId::new(id), session, move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
