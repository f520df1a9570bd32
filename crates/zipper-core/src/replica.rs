//! 副本、阶段描述符与接入侧的副本集合。
//!
//! 核心流水线只读取 [`StageSnapshot`]：每次分发都重新拉取一次阶段名与副本列表，不做缓存。
//! [`ReplicaSet`] 是连接接入方使用的标准实现，登记副本的同时把会话写入
//! [`SessionDirectory`]，让回包接收器开始监听该会话。

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::debug;

use crate::{directory::SessionDirectory, error::DirectoryError};

/// 副本标识，在所属 [`ReplicaSet`] 内单调递增且不复用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaId(u64);

impl ReplicaId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica#{}", self.0)
    }
}

type CancelFn = Arc<dyn Fn() + Send + Sync>;

/// 一个阶段副本的快照视图。
///
/// - `session` 为 `None` 表示副本尚未连上（或已断开）；
/// - `cancel` 把副本从其来源集合中注销，多次调用无副作用。
pub struct Replica<S> {
    id: ReplicaId,
    session: Option<Arc<S>>,
    cancel: CancelFn,
}

impl<S> Replica<S> {
    pub fn new(
        id: ReplicaId,
        session: Option<Arc<S>>,
        cancel: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            session,
            cancel: Arc::new(cancel),
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn session(&self) -> Option<&Arc<S>> {
        self.session.as_ref()
    }

    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl<S> Clone for Replica<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            session: self.session.clone(),
            cancel: Arc::clone(&self.cancel),
        }
    }
}

impl<S> fmt::Debug for Replica<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.id)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

/// 某一时刻的阶段视图：阶段名与副本列表（可以为空）。
pub struct StageSnapshot<S> {
    pub name: Arc<str>,
    pub replicas: Vec<Replica<S>>,
}

impl<S> StageSnapshot<S> {
    pub fn new(name: impl Into<Arc<str>>, replicas: Vec<Replica<S>>) -> Self {
        Self {
            name: name.into(),
            replicas,
        }
    }
}

impl<S> Clone for StageSnapshot<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            replicas: self.replicas.clone(),
        }
    }
}

impl<S> fmt::Debug for StageSnapshot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSnapshot")
            .field("name", &self.name)
            .field("replicas", &self.replicas)
            .finish()
    }
}

/// 拉取式阶段描述符。
///
/// 每次调用都必须返回当前视图；两次调用之间副本数量与顺序都可能变化。
/// 任意 `Fn() -> StageSnapshot<S>` 闭包都满足该契约。
pub trait StageDescriptor<S>: Send + Sync + 'static {
    fn snapshot(&self) -> StageSnapshot<S>;
}

impl<S, F> StageDescriptor<S> for F
where
    F: Fn() -> StageSnapshot<S> + Send + Sync + 'static,
{
    fn snapshot(&self) -> StageSnapshot<S> {
        self()
    }
}

/// 接入侧维护的单个阶段副本集合。
///
/// # 教案式说明
/// - **意图（Why）**：把“副本上线”拆成两件必须同时发生的事：加入分发列表、通知回包接收器；
/// - **契约（What）**：
///   - [`register`](Self::register) 先登记再写入目录；目录写入失败时撤销登记并返回错误，
///     不会出现“能收到请求却无人接收回包”的副本；
///   - [`register_disconnected`](Self::register_disconnected) 登记一个没有会话的副本，
///     发送路径会对它执行透传并注销；
///   - 每个副本的 `cancel` 通过弱引用注销自身，集合释放后调用为空操作。
pub struct ReplicaSet<S> {
    inner: Arc<ReplicaSetInner<S>>,
}

struct ReplicaSetInner<S> {
    name: Arc<str>,
    directory: Arc<SessionDirectory<S>>,
    replicas: RwLock<Vec<(ReplicaId, Option<Arc<S>>)>>,
    next_id: AtomicU64,
}

impl<S: Send + Sync + 'static> ReplicaSet<S> {
    pub fn new(name: impl Into<Arc<str>>, directory: Arc<SessionDirectory<S>>) -> Self {
        Self {
            inner: Arc::new(ReplicaSetInner {
                name: name.into(),
                directory,
                replicas: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.inner.name
    }

    /// 登记一个已连接副本，并把其会话通知给回包接收器。
    pub fn register(&self, session: Arc<S>) -> Result<ReplicaId, DirectoryError> {
        let id = self.push(Some(Arc::clone(&session)));
        if let Err(err) = self
            .inner
            .directory
            .announce(&self.inner.name, Some(session))
        {
            self.deregister(id);
            return Err(err);
        }
        debug!(stage = %self.inner.name, replica = %id, "replica registered");
        Ok(id)
    }

    /// 登记一个尚未连接的副本。
    pub fn register_disconnected(&self) -> ReplicaId {
        let id = self.push(None);
        debug!(stage = %self.inner.name, replica = %id, "disconnected replica registered");
        id
    }

    /// 注销副本；副本不存在时返回 `false`。
    pub fn deregister(&self, id: ReplicaId) -> bool {
        self.inner.remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.replicas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.replicas.read().is_empty()
    }

    /// 以共享方式暴露为阶段描述符。
    pub fn descriptor(&self) -> Arc<dyn StageDescriptor<S>> {
        Arc::new(self.clone())
    }

    fn push(&self, session: Option<Arc<S>>) -> ReplicaId {
        let id = ReplicaId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.replicas.write().push((id, session));
        id
    }
}

impl<S> ReplicaSetInner<S> {
    fn remove(&self, id: ReplicaId) -> bool {
        let mut replicas = self.replicas.write();
        match replicas.iter().position(|(candidate, _)| *candidate == id) {
            Some(index) => {
                replicas.remove(index);
                debug!(stage = %self.name, replica = %id, "replica deregistered");
                true
            }
            None => false,
        }
    }
}

impl<S> Clone for ReplicaSet<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for ReplicaSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaSet")
            .field("name", &self.inner.name)
            .field("replicas", &self.inner.replicas.read().len())
            .finish()
    }
}

impl<S: Send + Sync + 'static> StageDescriptor<S> for ReplicaSet<S> {
    fn snapshot(&self) -> StageSnapshot<S> {
        let replicas = self
            .inner
            .replicas
            .read()
            .iter()
            .map(|(id, session)| {
                let id = *id;
                let weak: Weak<ReplicaSetInner<S>> = Arc::downgrade(&self.inner);
                Replica::new(id, session.clone(), move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.remove(id);
                    }
                })
            })
            .collect();
        StageSnapshot {
            name: self.inner.name.clone(),
            replicas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(capacity: usize) -> (ReplicaSet<u8>, Arc<SessionDirectory<u8>>) {
        let directory = Arc::new(SessionDirectory::new(capacity));
        (ReplicaSet::new("sfn-1", directory.clone()), directory)
    }

    #[test]
    fn register_announces_the_session() {
        let (replicas, directory) = set(4);
        let id = replicas.register(Arc::new(9)).unwrap();
        assert_eq!(id.get(), 0);
        assert_eq!(replicas.len(), 1);
        assert_eq!(directory.len(), 1);

        let snapshot = replicas.snapshot();
        assert_eq!(&*snapshot.name, "sfn-1");
        assert_eq!(snapshot.replicas[0].session().map(|s| **s), Some(9));
    }

    #[test]
    fn failed_announce_rolls_back_registration() {
        let (replicas, _directory) = set(1);
        replicas.register(Arc::new(1)).unwrap();
        let err = replicas.register(Arc::new(2)).unwrap_err();
        assert!(matches!(err, DirectoryError::QueueFull { .. }));
        assert_eq!(replicas.len(), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (replicas, _directory) = set(4);
        replicas.register_disconnected();
        let kept = replicas.register_disconnected();

        let snapshot = replicas.snapshot();
        let first = snapshot.replicas[0].clone();
        first.cancel();
        first.cancel();

        let remaining = replicas.snapshot();
        assert_eq!(remaining.replicas.len(), 1);
        assert_eq!(remaining.replicas[0].id(), kept);
    }

    #[test]
    fn cancel_after_set_is_dropped_is_a_no_op() {
        let (replicas, _directory) = set(4);
        replicas.register_disconnected();
        let replica = replicas.snapshot().replicas.remove(0);
        drop(replicas);
        replica.cancel();
    }

    #[test]
    fn closures_are_stage_descriptors() {
        let descriptor = || StageSnapshot::<u8>::new("empty", Vec::new());
        let snapshot = StageDescriptor::snapshot(&descriptor);
        assert_eq!(&*snapshot.name, "empty");
        assert!(snapshot.replicas.is_empty());
    }
}
