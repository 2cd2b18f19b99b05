//! Test double: a `ResourceStore` that records writes and injects faults.

use std::sync::Mutex;

use tokio::sync::watch;
use webui_state::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Get,
    Create,
    Update,
    Delete,
}

type ErrorFactory = Box<dyn Fn() -> StateError + Send>;

/// Wraps an in-memory [`StateStore`], recording every write attempt.
pub(crate) struct RecordingStore {
    inner: StateStore,
    writes: Mutex<Vec<(Op, Kind)>>,
    faults: Mutex<Vec<(Op, Kind, ErrorFactory)>>,
    cancel: Mutex<Option<(Op, Kind, watch::Sender<bool>)>>,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: StateStore::open_in_memory(&KindRegistry::standard()).unwrap(),
            writes: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
        }
    }

    /// The wrapped store, for arranging state without recording.
    pub(crate) fn inner(&self) -> &StateStore {
        &self.inner
    }

    pub(crate) fn write_ops(&self) -> Vec<(Op, Kind)> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    /// Fail the next `op` on `kind` with the error `make` builds.
    pub(crate) fn fail_next(
        &self,
        op: Op,
        kind: Kind,
        make: impl Fn() -> StateError + Send + 'static,
    ) {
        self.faults.lock().unwrap().push((op, kind, Box::new(make)));
    }

    /// Flip `cancel` to true right after the next `op` on `kind`.
    pub(crate) fn cancel_after(&self, op: Op, kind: Kind, cancel: watch::Sender<bool>) {
        *self.cancel.lock().unwrap() = Some((op, kind, cancel));
    }

    fn before(&self, op: Op, kind: Kind) -> StateResult<()> {
        if op != Op::Get {
            self.writes.lock().unwrap().push((op, kind));
        }
        let mut faults = self.faults.lock().unwrap();
        match faults.iter().position(|(o, k, _)| *o == op && *k == kind) {
            Some(index) => {
                let (_, _, make) = faults.remove(index);
                Err(make())
            }
            None => Ok(()),
        }
    }

    fn after(&self, op: Op, kind: Kind) {
        let mut cancel = self.cancel.lock().unwrap();
        if matches!(&*cancel, Some((o, k, _)) if *o == op && *k == kind) {
            if let Some((_, _, tx)) = cancel.take() {
                tx.send(true).unwrap();
            }
        }
    }
}

impl ResourceStore for RecordingStore {
    fn get<R: Resource>(&self, key: &ObjectKey) -> StateResult<R> {
        self.before(Op::Get, R::KIND)?;
        let result = self.inner.get(key);
        self.after(Op::Get, R::KIND);
        result
    }

    fn list<R: Resource>(&self) -> StateResult<Vec<R>> {
        self.inner.list()
    }

    fn create<R: Resource>(&self, object: &R) -> StateResult<R> {
        self.before(Op::Create, R::KIND)?;
        let result = self.inner.create(object);
        self.after(Op::Create, R::KIND);
        result
    }

    fn update<R: Resource>(&self, object: &R) -> StateResult<R> {
        self.before(Op::Update, R::KIND)?;
        let result = self.inner.update(object);
        self.after(Op::Update, R::KIND);
        result
    }

    fn delete<R: Resource>(&self, key: &ObjectKey) -> StateResult<()> {
        self.before(Op::Delete, R::KIND)?;
        let result = self.inner.delete::<R>(key);
        self.after(Op::Delete, R::KIND);
        result
    }
}
