//! Per-function attachment state (spec §3 "FunctionContext", §4.3).
//!
//! One `FunctionContext` exists per `Target` address that has ever been
//! attached or replaced. It owns the trampoline (via `OwnedSlab`, built
//! by `codegen`), the ordered listener list for monitor mode, or the
//! single replacement record for replace mode. The façade in
//! `interceptor` looks these up by address; nothing in here knows about
//! that table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use interceptor_types::{Address, InterceptError, Result};

use crate::listener::{Listener, ListenerId};
use crate::slab::OwnedSlab;

/// Whether a `FunctionContext` is driving listener callbacks around the
/// original function (`Monitor`) or has swapped it out entirely
/// (`Replace`). Spec §3 rules out mixing the two on the same `Target`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Monitor,
    Replace,
}

/// Opaque handle returned from attach, passed back to request detach.
/// Carries the target address so the façade can find the right
/// `FunctionContext` without a second table keyed by handle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ListenerHandle {
    pub function: Address,
    pub listener: ListenerId,
}

struct Attachment {
    id: ListenerId,
    listener: Arc<dyn Listener>,
    /// Caller-supplied value from `attach`'s `user_data` argument,
    /// seeded into the listener's `function_data` slot on every fresh
    /// frame (spec §4.3 "attach(target, listener, user_data)").
    user_data: u64,
}

pub struct FunctionContext {
    address: Address,
    mode: Mode,
    trampoline: Arc<dyn OwnedSlab>,
    listeners: Vec<Attachment>,
    next_listener_id: AtomicU64,
    /// Address of the original function, reachable for `Replace` mode so
    /// a replacement can still call through to it (spec §4.3, "replace").
    replacement_original: Option<Address>,
}

impl FunctionContext {
    pub fn new_monitor(address: Address, trampoline: Arc<dyn OwnedSlab>) -> Self {
        FunctionContext {
            address,
            mode: Mode::Monitor,
            trampoline,
            listeners: Vec::new(),
            next_listener_id: AtomicU64::new(1),
            replacement_original: None,
        }
    }

    pub fn new_replace(
        address: Address,
        trampoline: Arc<dyn OwnedSlab>,
        original: Address,
    ) -> Self {
        FunctionContext {
            address,
            mode: Mode::Replace,
            trampoline,
            listeners: Vec::new(),
            next_listener_id: AtomicU64::new(1),
            replacement_original: Some(original),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn trampoline(&self) -> &Arc<dyn OwnedSlab> {
        &self.trampoline
    }

    pub fn original_for_replace(&self) -> Option<Address> {
        self.replacement_original
    }

    /// Appends a listener, returning its handle. Monitor-mode only; the
    /// façade rejects attach calls on a `Replace` context before this is
    /// reached (spec §3, a `Target` is either monitored or replaced).
    pub fn add_listener(&mut self, listener: Arc<dyn Listener>, user_data: u64) -> Result<ListenerHandle> {
        if self.mode != Mode::Monitor {
            return Err(InterceptError::AlreadyReplaced {
                address: self.address.as_usize(),
            });
        }
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.push(Attachment { id, listener, user_data });
        Ok(ListenerHandle {
            function: self.address,
            listener: id,
        })
    }

    /// Removes a listener by id. Returns whether any listeners remain,
    /// which the façade uses to decide whether to revert the trampoline
    /// entirely (spec §4.3, "detach").
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.retain(|a| a.id != id);
        !self.listeners.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Removes every attachment of this exact listener object (spec
    /// §4.3, "detach(listener) removes every listener record for this
    /// listener across all contexts" — within a single context that is
    /// at most one record, since `add_listener` already rejects a
    /// duplicate, but this loops defensively rather than assuming it).
    /// Returns whether anything was removed.
    pub fn remove_listener_matching(&mut self, listener: &Arc<dyn Listener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|a| !Arc::ptr_eq(&a.listener, listener));
        before != self.listeners.len()
    }

    /// Whether this exact listener object is already attached here, by
    /// pointer identity rather than by id (spec §4.3, "rejects with
    /// `AlreadyAttached` if this listener/data pair is already attached
    /// here" — the "data" half is the listener's own interior state, so
    /// identity of the `Arc` is the whole check).
    pub fn contains_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        self.listeners
            .iter()
            .any(|a| Arc::ptr_eq(&a.listener, listener))
    }

    /// Ordered snapshot of the attached listeners, walked in attach order
    /// on enter and reverse order on leave (spec §4.2, step 3 and 7).
    /// Carries each listener's `user_data` so `dispatch_enter` can seed
    /// the fresh frame's `function_data` slot before calling `on_enter`.
    pub fn listeners_enter_order(&self) -> impl Iterator<Item = (ListenerId, &Arc<dyn Listener>, u64)> {
        self.listeners.iter().map(|a| (a.id, &a.listener, a.user_data))
    }

    pub fn listeners_leave_order(&self) -> impl Iterator<Item = (ListenerId, &Arc<dyn Listener>)> {
        self.listeners.iter().rev().map(|a| (a.id, &a.listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSlab;
    impl crate::slab::OwnedSlab for StubSlab {
        fn entry(&self) -> Address {
            Address(0)
        }
        fn original_prologue(&self) -> &[u8] {
            &[]
        }
    }

    struct NoopListener;
    impl Listener for NoopListener {}

    #[test]
    fn replace_mode_rejects_add_listener() {
        let mut ctx = FunctionContext::new_replace(Address(0x10), Arc::new(StubSlab), Address(0x10));
        let listener: Arc<dyn Listener> = Arc::new(NoopListener);
        let err = ctx.add_listener(listener, 0).unwrap_err();
        assert_eq!(err, InterceptError::AlreadyReplaced { address: 0x10 });
    }

    #[test]
    fn remove_listener_reports_emptiness() {
        let mut ctx = FunctionContext::new_monitor(Address(0x20), Arc::new(StubSlab));
        let listener: Arc<dyn Listener> = Arc::new(NoopListener);
        let handle = ctx.add_listener(listener.clone(), 42).unwrap();
        assert!(!ctx.is_empty());
        assert!(ctx.contains_listener(&listener));
        let remaining = ctx.remove_listener(handle.listener);
        assert!(!remaining);
        assert!(ctx.is_empty());
    }

    #[test]
    fn contains_listener_is_identity_not_equality() {
        let mut ctx = FunctionContext::new_monitor(Address(0x30), Arc::new(StubSlab));
        let a: Arc<dyn Listener> = Arc::new(NoopListener);
        let b: Arc<dyn Listener> = Arc::new(NoopListener);
        ctx.add_listener(a.clone(), 0).unwrap();
        assert!(ctx.contains_listener(&a));
        assert!(!ctx.contains_listener(&b));
    }
}
