//! Listener trait and the invocation-context surface handed to it (spec
//! §3 "Listener", §4.5 "Invocation Context Surface").

use interceptor_types::{system_error, Address, CpuContext, InterceptError, Result, ThreadId};

use crate::frame::InvocationStack;

/// Identifies one attached listener within a `FunctionContext`'s ordered
/// list. Stable for the lifetime of the attachment; reused only after
/// `detach` removes the slot (spec §4.3, attach returns a handle the
/// caller later passes to `detach`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(pub u64);

/// Which half of a call a listener callback is running in. Determines
/// which `InvocationContext` operations spec §4.5 allows: the return
/// value is only writable on the leave side.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Enter,
    Leave,
}

/// Observes entry to and return from an intercepted function.
///
/// `on_enter`/`on_leave` run on the thread that called the intercepted
/// function, inline in its call path (spec §4.2). They must not assume
/// which thread that is, must not block indefinitely, and must not
/// attach, detach, replace or revert anything — any of those would try
/// to re-enter the transaction lock this thread may already be inside
/// via the dispatcher. Nothing in this crate prevents that misuse; it is
/// a documented caller obligation, same as in the system this one is
/// modeled on.
pub trait Listener: Send + Sync {
    fn on_enter(&self, ctx: &InvocationContext) {
        let _ = ctx;
    }

    fn on_leave(&self, ctx: &InvocationContext) {
        let _ = ctx;
    }
}

/// The read/write view of the current call a listener's callback
/// receives. Borrows the top frame of the calling thread's
/// `InvocationStack` for the duration of the callback only; every
/// accessor fails with `InvalidOperation` once the frame it was built
/// against has been popped (spec §4.5, "accessors called after the frame
/// has been popped fail with `InvalidOperation`").
pub struct InvocationContext {
    listener: ListenerId,
    function: Address,
    phase: Phase,
}

impl InvocationContext {
    pub(crate) fn new(listener: ListenerId, function: Address, phase: Phase) -> Self {
        InvocationContext {
            listener,
            function,
            phase,
        }
    }

    pub fn function(&self) -> Address {
        self.function
    }

    pub fn thread_id(&self) -> ThreadId {
        ThreadId::current()
    }

    /// Depth of the current thread's invocation stack, including this
    /// call. A value of 1 means this is the outermost intercepted call
    /// on this thread.
    pub fn depth(&self) -> usize {
        InvocationStack::depth()
    }

    /// Read the nth word-sized positional argument (0-based) passed to
    /// the intercepted function. Indices `0..SYSV_ARG_REGISTERS` come
    /// from the saved CPU context's argument registers; the rest come
    /// from the caller's stack, at `[rsp + 8 * (n - SYSV_ARG_REGISTERS + 1)]`
    /// relative to the saved stack pointer — the slot immediately above
    /// the return address the call instruction pushed (spec §4.5;
    /// SUPPLEMENTED section, following
    /// `_gum_interceptor_invocation_get_nth_argument`'s register/stack
    /// split).
    pub fn nth_argument(&self, n: usize) -> Result<u64> {
        self.with_top(|frame| {
            if let Some(value) = frame.cpu_snapshot.register_argument(n) {
                return value;
            }
            let extra = n - interceptor_types::cpu_context::SYSV_ARG_REGISTERS;
            let stack_slot = frame.cpu_snapshot.stack_pointer() + 8 * (extra as u64 + 1);
            // SAFETY: stack_slot points into the target thread's own
            // stack, which is live for the duration of the intercepted
            // call; the dispatcher only ever calls listeners from that
            // same thread.
            unsafe { *(stack_slot as *const u64) }
        })
    }

    pub fn set_nth_argument(&self, n: usize, value: u64) -> Result<()> {
        self.with_top(|frame| {
            if frame.cpu_snapshot.set_register_argument(n, value) {
                return;
            }
            let extra = n - interceptor_types::cpu_context::SYSV_ARG_REGISTERS;
            let stack_slot = frame.cpu_snapshot.stack_pointer() + 8 * (extra as u64 + 1);
            // SAFETY: see `nth_argument`.
            unsafe { *(stack_slot as *mut u64) = value };
        })
    }

    /// Read at leave; writable only on the leave side (spec §4.5).
    pub fn return_value(&self) -> Result<u64> {
        self.with_top(|frame| frame.cpu_snapshot.return_value())
    }

    pub fn set_return_value(&self, value: u64) -> Result<()> {
        if self.phase != Phase::Leave {
            return Err(InterceptError::PolicyViolation(
                "return value is writable only from on_leave",
            ));
        }
        self.with_top(|frame| frame.cpu_snapshot.set_return_value(value))
    }

    pub fn return_address(&self) -> Result<u64> {
        self.with_top(|frame| frame.return_address)
    }

    pub fn set_return_address(&self, value: u64) -> Result<()> {
        self.with_top(|frame| frame.return_address = value)
    }

    /// Full snapshot of the saved registers. Read/write during enter;
    /// the leave-side snapshot reflects whatever enter-side listeners
    /// left behind, per spec §4.5.
    pub fn cpu_context(&self) -> Result<CpuContext> {
        self.with_top(|frame| frame.cpu_snapshot)
    }

    pub fn set_cpu_context(&self, value: CpuContext) -> Result<()> {
        self.with_top(|frame| frame.cpu_snapshot = value)
    }

    pub fn system_error(&self) -> Result<i32> {
        self.with_top(|frame| frame.system_error)
    }

    pub fn set_system_error(&self, value: i32) -> Result<()> {
        self.with_top(|frame| frame.system_error = value)
    }

    /// Shortcut to the real OS errno, independent of any frame. Exposed
    /// separately because listener code sometimes wants to read the
    /// live indicator rather than the snapshot the dispatcher will
    /// re-apply at leave.
    pub fn live_system_error(&self) -> i32 {
        system_error::get()
    }

    /// Per-listener, per-call scratch storage that survives from
    /// `on_enter` to the matching `on_leave` (spec §3, "function_data").
    pub fn function_data(&self) -> Result<u64> {
        self.with_top(|frame| frame.function_data(self.listener.0))
    }

    pub fn set_function_data(&self, value: u64) -> Result<()> {
        self.with_top(|frame| frame.set_function_data(self.listener.0, value))
    }

    fn with_top<R>(&self, f: impl FnOnce(&mut crate::frame::InvocationFrame) -> R) -> Result<R> {
        InvocationStack::with_top(f).ok_or(InterceptError::InvalidOperation)
    }
}
