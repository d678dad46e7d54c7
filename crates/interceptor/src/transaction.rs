//! Public transaction handle (spec §4.3 "begin_transaction()/
//! end_transaction()").
//!
//! Wraps `interceptor_state::Transaction`'s reentrant lock with the one
//! thing that crate deliberately doesn't know about: flushing the
//! instruction cache once the outermost transaction on this thread is
//! about to release the table, so no other thread can observe a patched
//! target before the fence that makes the patch visible has run (spec
//! §4.3, "defers cache-flush to outermost-transaction end").

use interceptor_codegen::{CacheSync, X86CacheSync};
use interceptor_types::Address;

/// RAII transaction guard. `end_transaction()` has no separate method —
/// it is simply this guard's `Drop`, which is the idiomatic Rust shape
/// for "begin/end" pairs the teacher's own code favors elsewhere (see
/// `interceptor_state::transaction::Transaction` itself).
#[must_use]
pub struct Transaction {
    inner: interceptor_state::Transaction,
}

impl Transaction {
    pub fn begin() -> Self {
        Transaction {
            inner: interceptor_state::Transaction::begin(),
        }
    }

    pub fn depth() -> usize {
        interceptor_state::Transaction::depth()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if interceptor_state::Transaction::depth() == 1 {
            X86CacheSync.clear_instruction_cache(Address(0), 0);
        }
    }
}
