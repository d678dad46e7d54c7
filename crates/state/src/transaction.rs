//! Transaction protocol bracketing attach/detach/replace/revert (spec §3
//! "Transaction", §4.3, testable property "Transaction atomicity").
//!
//! A `Transaction` is a reentrant lock over the whole interception table:
//! the thread that begins one can begin nested transactions freely (the
//! façade's own attach/detach helpers each open one, so a caller batching
//! several calls inside their own outer transaction must not deadlock),
//! while any other thread calling in blocks until the outermost
//! transaction on the owning thread completes. No code patching is
//! visible to a concurrently-running trampoline until the outermost
//! transaction drops, because nothing drops the table's write guard
//! until then.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

static TRANSACTION_LOCK: ReentrantMutex<()> = ReentrantMutex::new(());
static DEPTH: AtomicUsize = AtomicUsize::new(0);

/// RAII guard for one nesting level of a transaction. Dropping it ends
/// that level; the underlying table only becomes visible to other
/// threads once the outermost guard on the owning thread drops.
pub struct Transaction {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl Transaction {
    pub fn begin() -> Transaction {
        let guard = TRANSACTION_LOCK.lock();
        DEPTH.fetch_add(1, Ordering::SeqCst);
        Transaction { _guard: guard }
    }

    /// Current nesting depth on whichever thread holds the transaction
    /// lock; 0 if none is held. Exposed for the façade to assert it is
    /// not called from inside a listener callback (spec §4.5 caller
    /// obligation).
    pub fn depth() -> usize {
        DEPTH.load(Ordering::SeqCst)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        DEPTH.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_transactions_track_depth() {
        assert_eq!(Transaction::depth(), 0);
        let outer = Transaction::begin();
        assert_eq!(Transaction::depth(), 1);
        {
            let inner = Transaction::begin();
            assert_eq!(Transaction::depth(), 2);
            drop(inner);
        }
        assert_eq!(Transaction::depth(), 1);
        drop(outer);
        assert_eq!(Transaction::depth(), 0);
    }
}
