//! Interceptor façade: the public surface of the function interception
//! core (spec §4.3).
//!
//! `interceptor_state` owns the invocation state machine and
//! `interceptor_codegen` owns trampoline synthesis and target patching;
//! this crate is the only one that depends on both, and the only one a
//! caller needs to depend on directly. `facade` holds the process-wide
//! table of `FunctionContext`s keyed by target address; `transaction`
//! wraps the state crate's reentrant lock with the cache-flush-at-
//! outermost-commit behaviour spec §4.3 requires.

mod facade;
mod transaction;

pub use interceptor_state::{InvocationContext, Listener, ListenerHandle};
pub use interceptor_types::{Address, InterceptError, Result, ThreadId};
pub use transaction::Transaction;

use std::sync::Arc;

/// Zero-sized handle onto the process-wide interception table.
///
/// There is exactly one table per process — `facade`'s `OnceLock` — so
/// constructing an `Interceptor` never allocates; it is a way to spell
/// `attach`/`detach`/`replace`/`revert` as methods the way a scripting
/// binding (out of scope for this crate, per spec §1) would want to
/// wrap, without introducing a second source of truth for the table
/// itself.
#[derive(Clone, Copy, Default)]
pub struct Interceptor;

impl Interceptor {
    pub fn obtain() -> Interceptor {
        Interceptor
    }

    /// Attaches `listener` to `target`, building and activating a
    /// monitor-mode trampoline the first time anything attaches there.
    /// Rejects with `AlreadyAttached` if this exact listener is already
    /// attached here, or `AlreadyReplaced` if `target` is in replace
    /// mode (spec §4.3 "attach").
    pub fn attach(
        &self,
        target: Address,
        listener: Arc<dyn Listener>,
        user_data: u64,
    ) -> Result<ListenerHandle> {
        facade::attach(target, listener, user_data)
    }

    /// Removes every attachment of `listener`, across every target,
    /// deactivating and dropping any context left with no listeners and
    /// no replacement (spec §4.3 "detach").
    pub fn detach(&self, listener: &Arc<dyn Listener>) {
        facade::detach(listener)
    }

    /// Swaps `target` out for `replacement` (spec §4.3 "replace").
    /// Requires `target` to be either unattached or monitor-mode with no
    /// listeners.
    pub fn replace(&self, target: Address, replacement: Address) -> Result<()> {
        facade::replace(target, replacement)
    }

    /// Undoes `replace`, restoring `target`'s original bytes (spec §4.3
    /// "revert").
    pub fn revert(&self, target: Address) -> Result<()> {
        facade::revert(target)
    }

    /// The address a replacement function should call to invoke the
    /// original it replaced (spec §4.3, "a replacement can still call
    /// through to" the original; testable property 4, "Replace
    /// semantics").
    pub fn original_for_replace(&self, target: Address) -> Option<Address> {
        facade::original_for_replace(target)
    }

    /// Opens a transaction spanning any number of attach/detach/replace/
    /// revert calls made on the returned guard's thread. Nestable; only
    /// the outermost drop flushes the instruction cache and makes the
    /// batch visible to concurrently-running trampolines (spec §4.3
    /// "begin_transaction()/end_transaction()").
    pub fn begin_transaction(&self) -> Transaction {
        Transaction::begin()
    }

    /// Marks the calling thread ignored: no frame is pushed for any
    /// context on this thread until a matching `unignore` (spec §4.4).
    pub fn ignore(&self, thread: ThreadId) {
        facade::ignore_registry().ignore(thread)
    }

    /// Immediately reverses one `ignore` call.
    pub fn unignore(&self, thread: ThreadId) {
        facade::ignore_registry().unignore(thread)
    }

    /// Queues a deferred decrement, firing after the registry's fixed
    /// delay; a later call before the timer fires re-arms it and both
    /// decrements apply when it eventually does (spec §4.4, SPEC_FULL.md
    /// "drain all on fire").
    pub fn unignore_later(&self, thread: ThreadId) {
        facade::ignore_registry().unignore_later(thread)
    }
}
