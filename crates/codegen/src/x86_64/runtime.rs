//! `extern "C"` entry points the emitted trampoline code calls into.
//!
//! Every built trampoline bakes in the address of these two functions
//! (`runtime::dispatch_enter as u64` / `runtime::dispatch_leave as u64`)
//! as an immediate, alongside a raw pointer to the `FunctionContext` it
//! belongs to and the process-wide `IgnoreRegistry`. Both pointers are
//! supplied by the façade via `Arc::new_cyclic`, so they are stable for
//! the context's whole lifetime (see `interceptor`'s attach/replace).

use std::sync::Mutex;

use interceptor_state::{dispatch_enter, dispatch_leave, DispatchOutcome, FunctionContext, IgnoreRegistry};
use interceptor_types::CpuContext;

/// Called from `on_enter_trampoline`. Returns 1 to proceed (replace mode
/// should jump to the replacement) or 0 to skip (fall through to the
/// relocated prologue / original).
///
/// # Safety
/// `ctx` and `ignore` must point to live, correctly-typed allocations for
/// the duration of this call — guaranteed by the façade's ownership
/// model, not by anything the trampoline itself checks. `cpu` and
/// `retaddr_slot` must point at the trampoline's own stack-resident save
/// area.
#[no_mangle]
pub unsafe extern "C" fn interceptor_dispatch_enter(
    ctx: *const Mutex<FunctionContext>,
    ignore: *const IgnoreRegistry,
    cpu: *mut CpuContext,
    retaddr_slot: *mut u64,
) -> i64 {
    let ctx = &*ctx;
    let ignore = &*ignore;
    let cpu = &mut *cpu;
    let retaddr_slot = &mut *retaddr_slot;

    let guard = ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match dispatch_enter(&guard, ignore, cpu, retaddr_slot) {
        DispatchOutcome::Proceed => 1,
        DispatchOutcome::Skip => 0,
    }
}

/// Called from `on_leave_trampoline`. Returns the real return address the
/// matching `dispatch_enter` call squirreled away before the trampoline
/// overwrote the on-stack slot to route here — the caller's own `ret`
/// already consumed that slot getting here, so the emitted code must
/// jump to this value rather than `ret` again.
///
/// # Safety
/// Same obligations as `interceptor_dispatch_enter`.
#[no_mangle]
pub unsafe extern "C" fn interceptor_dispatch_leave(
    ctx: *const Mutex<FunctionContext>,
    cpu: *mut CpuContext,
) -> u64 {
    let ctx = &*ctx;
    let cpu = &mut *cpu;
    let guard = ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    dispatch_leave(&guard, cpu)
}
