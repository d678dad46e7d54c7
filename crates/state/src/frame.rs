//! The per-thread invocation stack (spec §3 "InvocationFrame",
//! "InvocationStack"; §4.4).
//!
//! Every thread that ever runs through a monitored or replaced
//! trampoline gets its own stack, pushed on enter and popped on leave.
//! Nothing here is shared across threads: there is no lock to take and
//! no contention to reason about, which is the point of keying state by
//! thread in the first place.

use std::cell::RefCell;
use std::collections::HashMap;

use interceptor_types::{Address, CpuContext};

/// One live call through an intercepted function, as seen by the
/// dispatcher (spec §3 "InvocationFrame").
pub struct InvocationFrame {
    pub function: Address,
    pub cpu_snapshot: CpuContext,
    /// The caller's original return address, read from the trampoline's
    /// saved link-register slot at enter and restored at leave unless a
    /// listener rewrote it.
    pub return_address: u64,
    /// The thread's OS last-error indicator snapshotted at entry;
    /// re-applied at leave unless a listener rewrote it (spec §3
    /// "system_error").
    pub system_error: i32,
    /// Call depth of intercepted frames on this thread, 0-based.
    pub depth: usize,
    /// Per-listener opaque scratch value, set in `on_enter` and read in
    /// the matching `on_leave` (spec §3 "function_data").
    function_data: HashMap<u64, u64>,
}

impl InvocationFrame {
    pub fn new(
        function: Address,
        cpu_snapshot: CpuContext,
        return_address: u64,
        system_error: i32,
        depth: usize,
    ) -> Self {
        InvocationFrame {
            function,
            cpu_snapshot,
            return_address,
            system_error,
            depth,
            function_data: HashMap::new(),
        }
    }

    pub fn function_data(&self, listener: u64) -> u64 {
        self.function_data.get(&listener).copied().unwrap_or(0)
    }

    pub fn set_function_data(&mut self, listener: u64, value: u64) {
        self.function_data.insert(listener, value);
    }
}

thread_local! {
    static STACK: RefCell<Vec<InvocationFrame>> = RefCell::new(Vec::new());
}

/// Handle onto the calling thread's invocation stack. All methods go
/// through the thread-local cell; there is deliberately no way to reach
/// another thread's stack from here (spec §3, "owned by the thread; not
/// visible across threads").
pub struct InvocationStack;

impl InvocationStack {
    /// Depth of the current thread's stack, i.e. how many intercepted
    /// calls are currently on it.
    pub fn depth() -> usize {
        STACK.with(|s| s.borrow().len())
    }

    pub fn push(frame: InvocationFrame) {
        STACK.with(|s| s.borrow_mut().push(frame));
    }

    pub fn pop() -> Option<InvocationFrame> {
        STACK.with(|s| s.borrow_mut().pop())
    }

    /// True if a frame for `function` already sits anywhere on this
    /// thread's stack — the replace-mode re-entrance guard (spec §4.2,
    /// "proceed = existing frame for this ctx on this thread == none").
    pub fn contains(function: Address) -> bool {
        STACK.with(|s| s.borrow().iter().any(|f| f.function == function))
    }

    /// Run `f` against the top frame, if any. Used by `InvocationContext`
    /// to expose the saved state to listeners without handing out a
    /// reference that would outlive the dispatch call.
    pub fn with_top<R>(f: impl FnOnce(&mut InvocationFrame) -> R) -> Option<R> {
        STACK.with(|s| s.borrow_mut().last_mut().map(f))
    }

    #[cfg(test)]
    pub fn clear() {
        STACK.with(|s| s.borrow_mut().clear());
    }
}
