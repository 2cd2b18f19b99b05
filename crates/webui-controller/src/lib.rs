//! webui-controller: turns `WebUi` objects into a running workload.
//!
//! The pieces, bottom-up:
//!
//! - [`builder`] derives the desired `Workload` and `ContentStore` from a parent.
//! - [`Reconciler`] converges one parent's children, given only its key.
//! - [`WorkQueue`] deduplicates keys and keeps one reconcile in flight per key.
//! - [`ChangeNotifier`] turns store events into queue entries.
//! - [`Controller`] runs the workers and owns retry, resync and shutdown.
//! - [`StatusBoard`] keeps the most recent result per parent for the API.

pub mod builder;
pub mod controller;
pub mod error;
pub mod notifier;
pub mod queue;
pub mod reconciler;
pub mod status;

#[cfg(test)]
mod testing;

pub use builder::{DesiredChildren, build, child_key, parent_key};
pub use controller::{Controller, ControllerConfig};
pub use error::{ErrorKind, ReconcileError, ReconcileResult, Step};
pub use notifier::{ChangeNotifier, Notification};
pub use queue::{Backoff, WorkQueue};
pub use reconciler::{Outcome, Reconciler, never_cancelled};
pub use status::{ReconcileStatus, StatusBoard, StatusError};
