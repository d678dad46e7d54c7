//! `dispatch_enter`/`dispatch_leave`: the dispatcher contracts the
//! trampoline builder's emitted code calls into on every intercepted
//! call (spec §4.2).
//!
//! These run on whatever thread called the target, inline in its call
//! path, with the full saved CPU context as an in/out parameter so
//! listener mutations are visible to the trampoline once it resumes.

use interceptor_types::{system_error, CpuContext, ThreadId};

use crate::context::{FunctionContext, Mode};
use crate::frame::{InvocationFrame, InvocationStack};
use crate::ignore::IgnoreRegistry;
use crate::listener::{InvocationContext, Phase};

/// What the trampoline should do once `dispatch_enter` returns.
///
/// `Proceed` always means a frame was pushed for this call: both modes
/// rewrite the saved return-address slot to chain into
/// `on_leave_trampoline` before continuing, so leave-side bookkeeping
/// (popping the frame, running leave listeners) happens on return.
/// `Skip` always means no frame was pushed — the call bypasses
/// `on_leave_trampoline` entirely and resumes the relocated prologue (or,
/// in monitor mode only, this can never redirect to a replacement) with
/// the real return address left untouched.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DispatchOutcome {
    /// Replace mode: jump to the replacement. Monitor mode: fall through
    /// to the relocated prologue. Either way, the saved return-address
    /// slot has been rewritten to chain into `on_leave_trampoline` first.
    Proceed,
    /// Fall through to the relocated prologue untouched, i.e. call the
    /// original directly — either because the thread is ignored or
    /// because this is a re-entrant call from inside the replacement
    /// itself (spec §4.2, the replace-mode re-entrance guard).
    Skip,
}

/// Runs on entry to an intercepted function.
///
/// `cpu` is the trampoline's saved register block; `retaddr_slot` is the
/// saved link-register/return-address slot. Both are mutated in place so
/// that listener writes (argument mutation, return-address rewriting)
/// take effect when the trampoline resumes.
pub fn dispatch_enter(
    ctx: &FunctionContext,
    ignore: &IgnoreRegistry,
    cpu: &mut CpuContext,
    retaddr_slot: &mut u64,
) -> DispatchOutcome {
    let thread = ThreadId::current();
    if ignore.is_ignored(thread) {
        log::trace!("dispatch_enter: thread {:?} ignored, skipping", thread);
        return DispatchOutcome::Skip;
    }

    if ctx.mode() == Mode::Replace && InvocationStack::contains(ctx.address()) {
        // Re-entrant call from inside the replacement itself (spec §4.2
        // re-entrance guard): this isn't a fresh interception event, so
        // no frame is pushed and no listener runs. The trampoline falls
        // straight through to the relocated prologue without chaining
        // through on_leave_trampoline, so a frame pushed here would
        // never be popped.
        log::trace!("dispatch_enter: {:?} re-entrant on thread {:?}, skipping", ctx.address(), thread);
        return DispatchOutcome::Skip;
    }

    let depth = InvocationStack::depth() + 1;
    let frame = InvocationFrame::new(ctx.address(), *cpu, *retaddr_slot, system_error::get(), depth);
    InvocationStack::push(frame);
    log::debug!("dispatch_enter: {:?} depth={}", ctx.address(), depth);

    for (id, listener, user_data) in ctx.listeners_enter_order() {
        InvocationStack::with_top(|frame| frame.set_function_data(id.0, user_data));
        let invocation = InvocationContext::new(id, ctx.address(), Phase::Enter);
        listener.on_enter(&invocation);
    }

    InvocationStack::with_top(|frame| {
        *cpu = frame.cpu_snapshot;
        *retaddr_slot = frame.return_address;
    });

    DispatchOutcome::Proceed
}

/// Runs on return from an intercepted function, reached only by a call
/// path `dispatch_enter` rewired the return-address slot for (monitor
/// mode's natural return, or replace mode's `Proceed` outcome).
///
/// `cpu` holds the registers as they stand right before the true return
/// to the caller; on return, it holds whatever the leave listeners left
/// behind (mutated return value included). Returns the real return
/// address the popped frame was holding, since the stack slot that used
/// to carry it was overwritten at enter time to route control flow
/// through `on_leave_trampoline` in the first place — the trampoline
/// must jump to this value rather than `ret`.
pub fn dispatch_leave(ctx: &FunctionContext, cpu: &mut CpuContext) -> u64 {
    let top_matches = InvocationStack::with_top(|frame| frame.function == ctx.address());
    match top_matches {
        Some(true) => {}
        Some(false) => panic!(
            "invocation stack corrupted: dispatch_leave for {:?} but top frame belongs to a different function",
            ctx.address()
        ),
        None => panic!(
            "invocation stack corrupted: dispatch_leave for {:?} with an empty stack",
            ctx.address()
        ),
    }

    InvocationStack::with_top(|frame| frame.cpu_snapshot = *cpu);

    for (id, listener) in ctx.listeners_leave_order() {
        let invocation = InvocationContext::new(id, ctx.address(), Phase::Leave);
        listener.on_leave(&invocation);
    }

    let frame = InvocationStack::pop().expect("checked present above");
    system_error::set(frame.system_error);
    *cpu = frame.cpu_snapshot;
    log::debug!("dispatch_leave: {:?} depth={}", ctx.address(), frame.depth);
    frame.return_address
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use interceptor_types::Address;

    use crate::context::FunctionContext;
    use crate::listener::InvocationContext;
    use crate::slab::OwnedSlab;

    struct StubSlab;
    impl OwnedSlab for StubSlab {
        fn entry(&self) -> Address {
            Address(0)
        }
        fn original_prologue(&self) -> &[u8] {
            &[]
        }
    }

    struct TaggedListener(&'static str, std::sync::Arc<Mutex<Vec<&'static str>>>);
    impl crate::listener::Listener for TaggedListener {
        fn on_enter(&self, _ctx: &InvocationContext) {
            self.1.lock().unwrap().push(self.0);
        }
        fn on_leave(&self, _ctx: &InvocationContext) {
            self.1.lock().unwrap().push(self.0);
        }
    }

    #[test]
    fn enter_runs_forward_leave_runs_reverse() {
        InvocationStack::clear();
        let ignore = IgnoreRegistry::new();
        let mut ctx = FunctionContext::new_monitor(Address(0x1000), std::sync::Arc::new(StubSlab));
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        ctx.add_listener(std::sync::Arc::new(TaggedListener("a", log.clone())), 0)
            .unwrap();
        ctx.add_listener(std::sync::Arc::new(TaggedListener("b", log.clone())), 0)
            .unwrap();

        let mut cpu = CpuContext::default();
        let mut retaddr = 0u64;
        let outcome = dispatch_enter(&ctx, &ignore, &mut cpu, &mut retaddr);
        assert_eq!(outcome, DispatchOutcome::Proceed);
        let real_retaddr = dispatch_leave(&ctx, &mut cpu);
        assert_eq!(real_retaddr, retaddr);

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "b", "a"]);
        assert_eq!(InvocationStack::depth(), 0);
    }

    #[test]
    fn ignored_thread_is_skipped_without_pushing_a_frame() {
        InvocationStack::clear();
        let ignore = IgnoreRegistry::new();
        ignore.ignore(ThreadId::current());
        let ctx = FunctionContext::new_monitor(Address(0x2000), std::sync::Arc::new(StubSlab));

        let mut cpu = CpuContext::default();
        let mut retaddr = 0u64;
        let outcome = dispatch_enter(&ctx, &ignore, &mut cpu, &mut retaddr);
        assert_eq!(outcome, DispatchOutcome::Skip);
        assert_eq!(InvocationStack::depth(), 0);
    }

    #[test]
    fn replace_mode_reentrance_guard_skips_the_nested_call() {
        InvocationStack::clear();
        let ignore = IgnoreRegistry::new();
        let ctx = FunctionContext::new_replace(Address(0x3000), std::sync::Arc::new(StubSlab), Address(0x3000));

        let mut outer_cpu = CpuContext::default();
        let mut outer_retaddr = 0u64;
        let outer = dispatch_enter(&ctx, &ignore, &mut outer_cpu, &mut outer_retaddr);
        assert_eq!(outer, DispatchOutcome::Proceed);
        assert_eq!(InvocationStack::depth(), 1);

        // The re-entrant call (e.g. a replacement calling through to the
        // original via `original_for_replace`) pushes no frame of its
        // own: the stack still holds only the outer call, and this call
        // never reaches `dispatch_leave` since the trampoline resumes the
        // relocated prologue directly for a `Skip` outcome.
        let mut inner_cpu = CpuContext::default();
        let mut inner_retaddr = 0u64;
        let inner = dispatch_enter(&ctx, &ignore, &mut inner_cpu, &mut inner_retaddr);
        assert_eq!(inner, DispatchOutcome::Skip);
        assert_eq!(InvocationStack::depth(), 1);

        dispatch_leave(&ctx, &mut outer_cpu);
        assert_eq!(InvocationStack::depth(), 0);
    }
}
