//! # SessionDirectory：阶段会话目录
//!
//! ## 核心意图（Why）
//! - 回包接收器需要知道“某个阶段新上线了哪些会话”，才能在这些会话上等待入站子流；
//! - 连接接入方在副本上线时把会话写入目录，接收器从目录中取出，二者通过每个阶段一条有界
//!   队列解耦。
//!
//! ## 行为契约（What）
//! - `load_or_create`：按阶段名懒创建队列；目录存活期间同名阶段始终返回同一队列；
//! - `announce`：非阻塞写入；队列满返回 [`DirectoryError::QueueFull`]，由写入方自行决定策略；
//! - 队列为单写者/单逻辑读者：只有该阶段的回包接收器调用 [`SessionQueue::next`]；
//! - `close`/`close_all`：关闭队列，已排队的会话仍会被读出，随后读者看到队列结束。
//!
//! ## 风险提示（Trade-offs）
//! - 目录由调用方显式构造并注入流水线，而非进程级全局状态；测试可以各自持有独立实例。
//! - 队列条目为 `Option<Arc<S>>`：`None` 表示占位/空会话，读者直接忽略。

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::{
    config::{DEFAULT_DIRECTORY_QUEUE_CAPACITY, ZipperConfig},
    error::DirectoryError,
};

/// 阶段名 → 新会话队列的并发注册表。
#[derive(Debug)]
pub struct SessionDirectory<S> {
    queues: DashMap<Arc<str>, Arc<SessionQueue<S>>>,
    capacity: usize,
}

impl<S> SessionDirectory<S> {
    /// 以指定队列容量创建空目录；容量为 0 时按 1 处理。
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &ZipperConfig) -> Self {
        Self::new(config.directory_queue_capacity)
    }

    /// 取出或创建阶段的会话队列。
    ///
    /// `DashMap::entry` 保证并发调用下同名阶段只会创建一次。
    pub fn load_or_create(&self, stage: &str) -> Arc<SessionQueue<S>> {
        if let Some(queue) = self.queues.get(stage) {
            return Arc::clone(queue.value());
        }
        let capacity = self.capacity;
        self.queues
            .entry(Arc::from(stage))
            .or_insert_with(|| Arc::new(SessionQueue::new(Arc::from(stage), capacity)))
            .value()
            .clone()
    }

    /// 把新会话写入阶段队列（必要时创建队列）。
    pub fn announce(&self, stage: &str, session: Option<Arc<S>>) -> Result<(), DirectoryError> {
        self.load_or_create(stage).try_announce(session)
    }

    /// 关闭单个阶段的队列；阶段不存在时返回 `false`。
    pub fn close(&self, stage: &str) -> bool {
        match self.queues.get(stage) {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }

    /// 关闭全部阶段队列。
    pub fn close_all(&self) {
        for queue in self.queues.iter() {
            queue.close();
        }
    }

    /// 已创建的阶段数量。
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

impl<S> Default for SessionDirectory<S> {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTORY_QUEUE_CAPACITY)
    }
}

/// 单个阶段的新会话队列。
#[derive(Debug)]
pub struct SessionQueue<S> {
    stage: Arc<str>,
    sender: Mutex<Option<mpsc::Sender<Option<Arc<S>>>>>,
    receiver: AsyncMutex<mpsc::Receiver<Option<Arc<S>>>>,
}

impl<S> SessionQueue<S> {
    fn new(stage: Arc<str>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            stage,
            sender: Mutex::new(Some(tx)),
            receiver: AsyncMutex::new(rx),
        }
    }

    pub fn stage(&self) -> &Arc<str> {
        &self.stage
    }

    /// 非阻塞写入一个会话条目。
    pub fn try_announce(&self, session: Option<Arc<S>>) -> Result<(), DirectoryError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(DirectoryError::QueueClosed {
                stage: self.stage.clone(),
            });
        };
        sender.try_send(session).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DirectoryError::QueueFull {
                stage: self.stage.clone(),
            },
            mpsc::error::TrySendError::Closed(_) => DirectoryError::QueueClosed {
                stage: self.stage.clone(),
            },
        })
    }

    /// 等待下一个条目。
    ///
    /// - `Some(Some(session))`：新会话；
    /// - `Some(None)`：空条目，调用方应忽略并继续等待；
    /// - `None`：队列已关闭且排空。
    ///
    /// 取消安全：在 `tokio::select!` 中被丢弃不会丢失条目。
    pub async fn next(&self) -> Option<Option<Arc<S>>> {
        self.receiver.lock().await.recv().await
    }

    /// 关闭队列：丢弃唯一的发送端，读者排空后看到结束。
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_returns_the_same_queue() {
        let directory: SessionDirectory<u8> = SessionDirectory::new(2);
        let first = directory.load_or_create("sfn");
        let second = directory.load_or_create("sfn");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(directory.len(), 1);
        directory.load_or_create("other");
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn full_queue_is_reported_to_the_writer() {
        let directory: SessionDirectory<u8> = SessionDirectory::new(1);
        directory.announce("sfn", Some(Arc::new(1))).unwrap();
        let err = directory.announce("sfn", Some(Arc::new(2))).unwrap_err();
        assert_eq!(err, DirectoryError::QueueFull { stage: "sfn".into() });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_queue_drains_then_ends() {
        let directory: SessionDirectory<u8> = SessionDirectory::new(4);
        directory.announce("sfn", None).unwrap();
        directory.announce("sfn", Some(Arc::new(7))).unwrap();
        assert!(directory.close("sfn"));
        assert!(!directory.close("missing"));

        let queue = directory.load_or_create("sfn");
        assert!(queue.is_closed());
        assert_eq!(queue.next().await, Some(None));
        assert_eq!(queue.next().await.flatten().as_deref(), Some(&7));
        assert_eq!(queue.next().await, None);
        assert_eq!(
            queue.try_announce(None).unwrap_err(),
            DirectoryError::QueueClosed { stage: "sfn".into() }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_stages_share_one_directory() {
        let directory: Arc<SessionDirectory<u8>> = Arc::new(SessionDirectory::default());
        let mut handles = Vec::new();
        for n in 0..8u8 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                directory.announce(&format!("stage-{}", n % 2), Some(Arc::new(n)))
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(directory.len(), 2);
    }
}
