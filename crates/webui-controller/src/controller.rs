//! Controller loop: wires change notifications and the work queue to the
//! reconcile engine.
//!
//! On start every `WebUi` and the parent of every managed child is queued once
//! (this sweeps up children whose parent was deleted while the controller was
//! down). After that, change notifications are queued behind a short
//! coalescing window and a periodic resync re-queues everything. A fixed
//! number of workers drain the queue; the queue guarantees at most one
//! reconcile in flight per key.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use webui_state::{ContentStore, ObjectKey, ResourceStore, StateResult, WebUi, Workload};

use crate::builder::{is_managed, parent_key};
use crate::error::{ErrorKind, ReconcileError};
use crate::notifier::{ChangeNotifier, Notification};
use crate::queue::{Backoff, WorkQueue};
use crate::reconciler::Reconciler;
use crate::status::StatusBoard;

const MIN_RESYNC_INTERVAL: Duration = Duration::from_millis(1);

/// Controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Concurrent reconciles across different keys.
    pub workers: usize,
    /// Delay applied to change notifications so bursts collapse into one run.
    pub coalesce_window: Duration,
    /// Interval between full re-queues of every parent.
    pub resync_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            coalesce_window: Duration::from_millis(100),
            resync_interval: Duration::from_secs(300),
            retry_base: Duration::from_millis(5),
            retry_max: Duration::from_secs(300),
        }
    }
}

pub struct Controller<S> {
    reconciler: Arc<Reconciler<S>>,
    queue: Arc<WorkQueue>,
    statuses: StatusBoard,
    config: ControllerConfig,
}

impl<S: ResourceStore + 'static> Controller<S> {
    pub fn new(store: S, config: ControllerConfig) -> Self {
        let backoff = Backoff {
            base: config.retry_base,
            max: config.retry_max,
        };
        Self {
            reconciler: Arc::new(Reconciler::new(store)),
            queue: Arc::new(WorkQueue::new(backoff)),
            statuses: StatusBoard::new(),
            config,
        }
    }

    pub fn statuses(&self) -> StatusBoard {
        self.statuses.clone()
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Queue every parent plus the parent of every managed child.
    /// Returns the number of distinct keys queued.
    pub fn enqueue_all(&self) -> StateResult<usize> {
        let keys = parent_keys(self.reconciler.store())?;
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        Ok(count)
    }

    /// Run until `shutdown` flips to `true` or the change stream closes.
    ///
    /// In-flight reconciles observe the same shutdown signal and stop at their
    /// next store call.
    pub async fn run(self, mut notifier: ChangeNotifier, mut shutdown: watch::Receiver<bool>) {
        let workers = self.config.workers.max(1);
        info!(
            workers,
            coalesce_window = ?self.config.coalesce_window,
            resync_interval = ?self.config.resync_interval,
            "controller starting"
        );

        self.resync("initial sync");

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&self.reconciler),
                    Arc::clone(&self.queue),
                    self.statuses.clone(),
                    self.config.retry_base,
                    shutdown.clone(),
                ))
            })
            .collect();

        let period = self.config.resync_interval.max(MIN_RESYNC_INTERVAL);
        let mut resync = tokio::time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                notification = notifier.next() => match notification {
                    Some(Notification::Changed(key)) => {
                        debug!(%key, "change notification");
                        self.queue.add_after(key, self.config.coalesce_window);
                    }
                    Some(Notification::Resync) => self.resync("notifications lagged"),
                    None => {
                        warn!("change stream closed, stopping controller");
                        break;
                    }
                },
                _ = resync.tick() => self.resync("periodic resync"),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("controller shutting down");
        self.queue.shutdown();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("controller stopped");
    }

    fn resync(&self, reason: &str) {
        match self.enqueue_all() {
            Ok(count) => info!(count, reason, "queued all webuis"),
            Err(e) => warn!(error = %e, reason, "failed to list objects for resync"),
        }
    }
}

fn parent_keys<S: ResourceStore>(store: &S) -> StateResult<BTreeSet<ObjectKey>> {
    let mut keys: BTreeSet<ObjectKey> = store
        .list::<WebUi>()?
        .iter()
        .map(|webui| webui.metadata.key())
        .collect();

    let workloads = store.list::<Workload>()?;
    let content_stores = store.list::<ContentStore>()?;
    let children = workloads
        .iter()
        .map(|w| &w.metadata)
        .chain(content_stores.iter().map(|c| &c.metadata));
    for meta in children {
        if is_managed(meta)
            && let Some(parent) = parent_key(&meta.key())
        {
            keys.insert(parent);
        }
    }
    Ok(keys)
}

async fn worker<S: ResourceStore + 'static>(
    id: usize,
    reconciler: Arc<Reconciler<S>>,
    queue: Arc<WorkQueue>,
    statuses: StatusBoard,
    retry_base: Duration,
    cancel: watch::Receiver<bool>,
) {
    debug!(worker = id, "worker started");
    while let Some(key) = queue.get().await {
        let engine = Arc::clone(&reconciler);
        let target = key.clone();
        let signal = cancel.clone();
        let result =
            tokio::task::spawn_blocking(move || engine.reconcile(&target, &signal)).await;

        match result {
            Ok(Ok(outcome)) => {
                queue.forget(&key);
                debug!(worker = id, %key, ?outcome, "reconciled");
                statuses.record_success(&key, outcome).await;
            }
            Ok(Err(err)) => {
                handle_failure(&queue, &statuses, &key, &err, retry_base).await;
            }
            Err(e) => {
                error!(worker = id, %key, error = %e, "reconcile task panicked");
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
    debug!(worker = id, "worker stopped");
}

async fn handle_failure(
    queue: &Arc<WorkQueue>,
    statuses: &StatusBoard,
    key: &ObjectKey,
    err: &ReconcileError,
    retry_base: Duration,
) {
    match err.kind() {
        ErrorKind::Cancelled => {
            debug!(%key, step = %err.step(), "reconcile cancelled");
            // No-op once the queue is shutting down.
            queue.add(key.clone());
            return;
        }
        ErrorKind::Conflict => {
            debug!(%key, error = %err, "write conflict, retrying");
            queue.add_after(key.clone(), retry_base);
        }
        ErrorKind::Fatal => {
            let delay = queue.add_rate_limited(key.clone());
            error!(%key, error = %err, ?delay, "reconcile failed");
        }
        _ => {
            let delay = queue.add_rate_limited(key.clone());
            warn!(%key, error = %err, ?delay, "reconcile failed, retrying");
        }
    }
    statuses
        .record_failure(key, err, queue.requeues(key))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::child_key;
    use crate::testing::{Op, RecordingStore};
    use webui_state::*;

    fn spec(replicas: u32) -> WebUiSpec {
        WebUiSpec {
            contents: "<p>hi</p>".to_string(),
            image: "nginx:1".to_string(),
            replicas,
        }
    }

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            workers: 2,
            coalesce_window: Duration::from_millis(5),
            resync_interval: Duration::from_secs(60),
            retry_base: Duration::from_millis(5),
            retry_max: Duration::from_millis(50),
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn enqueue_all_covers_parents_and_orphans() {
        let store = StateStore::open_in_memory(&KindRegistry::standard()).unwrap();
        store.create(&WebUi::new("x", "a", spec(1))).unwrap();

        // Orphaned managed child of a deleted parent.
        let orphan = crate::builder::build(&WebUi::new("x", "gone", spec(1)));
        store.create(&orphan.content_store).unwrap();

        // Unmanaged object that merely shares the prefix.
        let mut foreign = ContentStore {
            metadata: ObjectMeta::new("x", "webui-foreign"),
            data: Default::default(),
        };
        foreign.metadata.labels.clear();
        store.create(&foreign).unwrap();

        let controller = Controller::new(store, fast_config());
        assert_eq!(controller.enqueue_all().unwrap(), 2);
        assert_eq!(controller.queue().len(), 2);
    }

    #[test]
    fn parent_and_child_queue_one_key() {
        let store = StateStore::open_in_memory(&KindRegistry::standard()).unwrap();
        let webui = store.create(&WebUi::new("x", "a", spec(1))).unwrap();
        let children = crate::builder::build(&webui);
        store.create(&children.content_store).unwrap();
        store.create(&children.workload).unwrap();

        let controller = Controller::new(store, fast_config());
        assert_eq!(controller.enqueue_all().unwrap(), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_and_cleared() {
        let store = RecordingStore::new();
        store.inner().create(&WebUi::new("x", "a", spec(2))).unwrap();
        store.fail_next(Op::Create, Kind::Workload, || StateError::Write("disk full".into()));
        let inner = store.inner().clone();
        let notifier = ChangeNotifier::new(inner.subscribe());

        let controller = Controller::new(store, fast_config());
        let statuses = controller.statuses();
        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(controller.run(notifier, rx));

        let key = ObjectKey::new("x", "a");
        wait_for(|| inner.get::<Workload>(&child_key(&key)).is_ok()).await;

        let board = statuses.clone();
        let probe = key.clone();
        for _ in 0..200 {
            if let Some(status) = board.get(&probe).await
                && status.last_error.is_none()
                && status.last_outcome.is_some()
            {
                assert!(status.attempts >= 2);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = statuses.get(&key).await.unwrap();
        assert_eq!(status.failures, 0);

        tx.send(true).unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn conflict_is_recorded_without_backoff_growth() {
        let queue = Arc::new(WorkQueue::new(Backoff::default()));
        let statuses = StatusBoard::new();
        let key = ObjectKey::new("x", "a");
        let err = ReconcileError::store(
            &key,
            crate::error::Step::UpdateWorkload,
            StateError::Conflict {
                kind: Kind::Workload,
                key: "x/webui-a".into(),
                expected: 1,
                found: 2,
            },
        );

        handle_failure(&queue, &statuses, &key, &err, Duration::from_millis(5)).await;
        assert_eq!(queue.requeues(&key), 0);
        let status = statuses.get(&key).await.unwrap();
        assert_eq!(status.last_error.unwrap().kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn cancelled_reconcile_is_not_a_failure() {
        let queue = Arc::new(WorkQueue::new(Backoff::default()));
        let statuses = StatusBoard::new();
        let key = ObjectKey::new("x", "a");
        let err = ReconcileError::Cancelled {
            key: key.clone(),
            step: crate::error::Step::GetWebUi,
        };

        handle_failure(&queue, &statuses, &key, &err, Duration::from_millis(5)).await;
        assert_eq!(queue.requeues(&key), 0);
        assert_eq!(queue.len(), 1);
        assert!(statuses.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn shutdown_before_start_returns() {
        let store = StateStore::open_in_memory(&KindRegistry::standard()).unwrap();
        let notifier = ChangeNotifier::new(store.subscribe());
        let controller = Controller::new(store, fast_config());
        let queue = controller.queue();
        let (_tx, rx) = watch::channel(true);

        controller.run(notifier, rx).await;
        assert!(queue.is_shutting_down());
    }
}
