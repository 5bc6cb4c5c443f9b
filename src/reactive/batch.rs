use std::cell::{Cell, RefCell};

type Notification = Box<dyn FnOnce()>;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static PENDING: RefCell<Vec<(u64, Notification)>> = const { RefCell::new(Vec::new()) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Runs `f` as one atomic update.
///
/// Observers of every observable written inside `f` are notified once, after
/// the outermost transaction returns, and see the final values only.
/// Transactions nest.
pub fn transaction<R>(f: impl FnOnce() -> R) -> R {
    let result = {
        let _guard = DepthGuard::enter();
        f()
    };
    if !in_transaction() {
        flush();
    }
    result
}

/// Whether the current thread is inside [`transaction`].
pub fn in_transaction() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}

/// Queues `notify` until the running transaction ends, or hands it back when
/// no transaction is open. At most one notification per observable is queued.
pub(crate) fn schedule(observable_id: u64, notify: Notification) -> Option<Notification> {
    if !in_transaction() {
        return Some(notify);
    }
    PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        if !pending.iter().any(|(id, _)| *id == observable_id) {
            pending.push((observable_id, notify));
        }
    });
    None
}

fn flush() {
    loop {
        let batch = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
        if batch.is_empty() {
            break;
        }
        for (_, notify) in batch {
            notify();
        }
    }
}
