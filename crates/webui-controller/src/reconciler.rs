//! Reconcile engine: converges a `WebUi`'s children on its spec.
//!
//! Given only an identity, the engine re-reads everything it needs and
//! decides in this order:
//!
//! ```text
//! get webui ── absent ──▶ delete workload, delete content store  (absent is fine)
//!     │
//!  present
//!     │
//! get workload ── absent ──▶ create content store (exists is fine), create workload
//!     │
//!  present
//!     │
//! replicas differ? ── yes ──▶ update workload replicas
//!     │
//!     no ──▶ nothing to do
//! ```
//!
//! Each invocation performs at most one category of write, and every path is
//! safe to run again with the same input. Only the replica count is compared
//! after creation; content and image are fixed once the children exist.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use webui_state::*;

use crate::builder::{build, child_key};
use crate::error::{ReconcileError, ReconcileResult, Step};

/// What a successful reconcile did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outcome {
    /// Parent absent; children removed. Flags say which ones still existed.
    Deleted { workload: bool, content_store: bool },
    /// Parent had no workload; children created. `content_store_existed`
    /// means an earlier or concurrent attempt had already created it.
    Created { content_store_existed: bool },
    /// Workload replica count corrected.
    Scaled { from: u32, to: u32 },
    /// Nothing to do.
    InSync,
}

impl Outcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Outcome::Deleted { .. })
    }
}

/// Stateless reconcile engine over a [`ResourceStore`].
pub struct Reconciler<S> {
    store: S,
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drive the children of `key` toward the parent's current spec.
    ///
    /// `cancel` is checked before every store call. Once it reads `true` the
    /// reconcile stops with [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled),
    /// even if earlier steps already wrote.
    pub fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &watch::Receiver<bool>,
    ) -> ReconcileResult<Outcome> {
        checkpoint(key, cancel, Step::GetWebUi)?;
        let webui: WebUi = match self.store.get(key) {
            Ok(webui) => webui,
            Err(e) if e.is_not_found() => return self.delete_children(key, cancel),
            Err(e) => return Err(ReconcileError::store(key, Step::GetWebUi, e)),
        };

        let child = child_key(key);
        checkpoint(key, cancel, Step::GetWorkload)?;
        let observed: Workload = match self.store.get(&child) {
            Ok(workload) => workload,
            Err(e) if e.is_not_found() => return self.create_children(key, &webui, cancel),
            Err(e) => return Err(ReconcileError::store(key, Step::GetWorkload, e)),
        };

        self.correct_drift(key, &webui, observed, cancel)
    }

    fn delete_children(
        &self,
        key: &ObjectKey,
        cancel: &watch::Receiver<bool>,
    ) -> ReconcileResult<Outcome> {
        let child = child_key(key);

        checkpoint(key, cancel, Step::DeleteWorkload)?;
        let workload = existed(self.store.delete::<Workload>(&child))
            .map_err(|e| ReconcileError::store(key, Step::DeleteWorkload, e))?;

        checkpoint(key, cancel, Step::DeleteContentStore)?;
        let content_store = existed(self.store.delete::<ContentStore>(&child))
            .map_err(|e| ReconcileError::store(key, Step::DeleteContentStore, e))?;

        if workload || content_store {
            info!(%key, workload, content_store, "webui gone, children deleted");
        } else {
            debug!(%key, "webui gone, no children left");
        }
        Ok(Outcome::Deleted {
            workload,
            content_store,
        })
    }

    fn create_children(
        &self,
        key: &ObjectKey,
        webui: &WebUi,
        cancel: &watch::Receiver<bool>,
    ) -> ReconcileResult<Outcome> {
        let desired = build(webui);

        checkpoint(key, cancel, Step::CreateContentStore)?;
        let content_store_existed = match self.store.create(&desired.content_store) {
            Ok(_) => false,
            // A retried or concurrent reconcile got here first.
            Err(e) if e.is_already_exists() => true,
            Err(e) => return Err(ReconcileError::store(key, Step::CreateContentStore, e)),
        };

        // The workload was just observed absent, so already-exists here means
        // another writer manages it. Surface it rather than adopting.
        checkpoint(key, cancel, Step::CreateWorkload)?;
        self.store
            .create(&desired.workload)
            .map_err(|e| ReconcileError::store(key, Step::CreateWorkload, e))?;

        info!(
            %key,
            image = %webui.spec.image,
            replicas = webui.spec.replicas,
            content_store_existed,
            "children created"
        );
        Ok(Outcome::Created {
            content_store_existed,
        })
    }

    fn correct_drift(
        &self,
        key: &ObjectKey,
        webui: &WebUi,
        mut observed: Workload,
        cancel: &watch::Receiver<bool>,
    ) -> ReconcileResult<Outcome> {
        let from = observed.spec.replicas;
        let to = webui.spec.replicas;
        if from == to {
            debug!(%key, replicas = to, "workload in sync");
            return Ok(Outcome::InSync);
        }

        observed.spec.replicas = to;
        checkpoint(key, cancel, Step::UpdateWorkload)?;
        self.store
            .update(&observed)
            .map_err(|e| ReconcileError::store(key, Step::UpdateWorkload, e))?;

        info!(%key, from, to, "workload replicas corrected");
        Ok(Outcome::Scaled { from, to })
    }
}

/// A cancellation receiver that never fires.
pub fn never_cancelled() -> watch::Receiver<bool> {
    // The receiver keeps the last value after the sender is dropped.
    watch::channel(false).1
}

fn checkpoint(key: &ObjectKey, cancel: &watch::Receiver<bool>, step: Step) -> ReconcileResult<()> {
    if *cancel.borrow() {
        debug!(%key, %step, "reconcile cancelled");
        return Err(ReconcileError::Cancelled {
            key: key.clone(),
            step,
        });
    }
    Ok(())
}

/// Map a delete result to whether the object existed.
fn existed(result: StateResult<()>) -> StateResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
