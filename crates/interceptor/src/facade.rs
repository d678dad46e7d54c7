//! The `Interceptor` table: one `FunctionContext` per instrumented
//! address, keyed by target (spec §4.3).
//!
//! This is the only place in the workspace that depends on both
//! `interceptor-state` (the invocation machinery) and
//! `interceptor-codegen` (trampoline construction and target patching).
//! Everything here runs under a `Transaction`, so concurrent attach/
//! detach/replace/revert calls serialize, and no other thread observes a
//! half-built redirect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::OnceCell as OnceLock;

use interceptor_codegen::patch;
use interceptor_codegen::TrampolineBuilder;
use interceptor_state::{
    FunctionContext, IgnoreRegistry, Listener, ListenerHandle, Mode, OwnedSlab,
};
use interceptor_types::{Address, InterceptError, Result};

use crate::transaction::Transaction;

/// Placeholder `OwnedSlab` used only for the instant between
/// `Arc::new_cyclic`'s closure discovering a build failure and the
/// caller observing the returned `Err` — `new_cyclic`'s closure cannot
/// itself be fallible, so a real trampoline build error is smuggled out
/// via a captured `Option` and this stands in as a value the closure can
/// still return. The `Arc` holding it is never published to the table
/// and is dropped at the end of the failing call.
struct NullSlab;

impl OwnedSlab for NullSlab {
    fn entry(&self) -> Address {
        Address(0)
    }

    fn original_prologue(&self) -> &[u8] {
        &[]
    }
}

struct InterceptorTable {
    contexts: Mutex<HashMap<usize, Arc<Mutex<FunctionContext>>>>,
    ignore: Arc<IgnoreRegistry>,
    trampolines: TrampolineBuilder,
}

impl InterceptorTable {
    fn new() -> Self {
        InterceptorTable {
            contexts: Mutex::new(HashMap::new()),
            ignore: IgnoreRegistry::new(),
            trampolines: TrampolineBuilder::new(),
        }
    }
}

static TABLE: OnceLock<InterceptorTable> = OnceLock::new();

fn table() -> &'static InterceptorTable {
    TABLE.get_or_init(InterceptorTable::new)
}

fn lock(ctx: &Mutex<FunctionContext>) -> std::sync::MutexGuard<'_, FunctionContext> {
    ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Attaches `listener` to `target`, creating and activating a
/// monitor-mode trampoline the first time any listener attaches there
/// (spec §4.3 "attach").
pub fn attach(target: Address, listener: Arc<dyn Listener>, user_data: u64) -> Result<ListenerHandle> {
    let _txn = Transaction::begin();
    let table = table();
    let mut contexts = table.contexts.lock().unwrap_or_else(|p| p.into_inner());
    let key = target.as_usize();

    if let Some(existing) = contexts.get(&key).cloned() {
        let mut guard = lock(&existing);
        if guard.mode() != Mode::Monitor {
            return Err(InterceptError::AlreadyReplaced { address: key });
        }
        if guard.contains_listener(&listener) {
            return Err(InterceptError::AlreadyAttached { address: key });
        }
        return guard.add_listener(listener, user_data);
    }

    let ignore_ptr = Arc::as_ptr(&table.ignore) as u64;
    let mut build_error: Option<InterceptError> = None;

    let context: Arc<Mutex<FunctionContext>> = Arc::new_cyclic(|weak: &Weak<Mutex<FunctionContext>>| {
        let context_ptr = weak.as_ptr() as u64;
        match table.trampolines.monitor_trampoline(target, context_ptr, ignore_ptr) {
            Ok(trampoline) => Mutex::new(FunctionContext::new_monitor(target, trampoline)),
            Err(err) => {
                build_error = Some(err);
                Mutex::new(FunctionContext::new_monitor(target, Arc::new(NullSlab)))
            }
        }
    });

    if let Some(err) = build_error {
        return Err(err);
    }

    {
        let guard = lock(&context);
        let trampoline = guard.trampoline();
        patch::activate(target, trampoline.entry(), trampoline.original_prologue().len())?;
    }

    let handle = lock(&context).add_listener(listener, user_data)?;
    contexts.insert(key, context);
    Ok(handle)
}

/// Removes every attachment of `listener`, across every target it was
/// ever attached to, deactivating and dropping any context left with no
/// listeners (spec §4.3 "detach").
pub fn detach(listener: &Arc<dyn Listener>) {
    let _txn = Transaction::begin();
    let table = table();
    let mut contexts = table.contexts.lock().unwrap_or_else(|p| p.into_inner());

    let mut to_remove = Vec::new();
    for (&key, ctx) in contexts.iter() {
        let mut guard = lock(ctx);
        if guard.mode() != Mode::Monitor {
            continue;
        }
        if guard.remove_listener_matching(listener) && guard.is_empty() {
            to_remove.push((key, Address(key), guard.trampoline().original_prologue().to_vec()));
        }
    }

    for (key, address, original) in to_remove {
        if let Err(err) = patch::deactivate(address, &original) {
            log::warn!("detach: failed to restore original bytes at {:?}: {:?}", address, err);
        }
        contexts.remove(&key);
        table.trampolines.evict(address);
    }
}

/// Swaps `target` out for `replacement` entirely (spec §4.3 "replace").
/// Requires no context to exist yet, or an existing monitor-mode context
/// with no listeners attached.
pub fn replace(target: Address, replacement: Address) -> Result<()> {
    let _txn = Transaction::begin();
    let table = table();
    let mut contexts = table.contexts.lock().unwrap_or_else(|p| p.into_inner());
    let key = target.as_usize();

    if let Some(existing) = contexts.get(&key) {
        let guard = lock(existing);
        if guard.mode() == Mode::Replace {
            return Err(InterceptError::AlreadyReplaced { address: key });
        }
        if !guard.is_empty() {
            return Err(InterceptError::PolicyViolation(
                "replace: target already has monitor listeners attached",
            ));
        }
    }

    let ignore_ptr = Arc::as_ptr(&table.ignore) as u64;
    let mut build_error: Option<InterceptError> = None;

    let context: Arc<Mutex<FunctionContext>> = Arc::new_cyclic(|weak: &Weak<Mutex<FunctionContext>>| {
        let context_ptr = weak.as_ptr() as u64;
        match table
            .trampolines
            .replace_trampoline(target, replacement, context_ptr, ignore_ptr)
        {
            Ok(trampoline) => {
                let original = trampoline.entry();
                Mutex::new(FunctionContext::new_replace(target, trampoline, original))
            }
            Err(err) => {
                build_error = Some(err);
                Mutex::new(FunctionContext::new_replace(target, Arc::new(NullSlab), Address(0)))
            }
        }
    });

    if let Some(err) = build_error {
        return Err(err);
    }

    {
        let guard = lock(&context);
        let trampoline = guard.trampoline();
        patch::activate(target, trampoline.entry(), trampoline.original_prologue().len())?;
    }

    contexts.insert(key, context);
    Ok(())
}

/// Undoes `replace`, restoring `target`'s original bytes (spec §4.3
/// "revert").
pub fn revert(target: Address) -> Result<()> {
    let _txn = Transaction::begin();
    let table = table();
    let mut contexts = table.contexts.lock().unwrap_or_else(|p| p.into_inner());
    let key = target.as_usize();

    let context = contexts
        .get(&key)
        .cloned()
        .ok_or(InterceptError::InvalidOperation)?;
    {
        let guard = lock(&context);
        if guard.mode() != Mode::Replace {
            return Err(InterceptError::InvalidOperation);
        }
        patch::deactivate(target, guard.trampoline().original_prologue())?;
    }
    contexts.remove(&key);
    table.trampolines.evict(target);
    Ok(())
}

/// Returns the address a replacement function should call to invoke the
/// function it replaced — the trampoline's own entry point, which
/// transparently benefits from the replace-mode re-entrance guard (spec
/// §4.3, "a replacement can still call through to" the original).
pub fn original_for_replace(target: Address) -> Option<Address> {
    let table = table();
    let contexts = table.contexts.lock().unwrap_or_else(|p| p.into_inner());
    let context = contexts.get(&target.as_usize())?;
    lock(context).original_for_replace()
}

/// Process-wide ignore registry, shared by every `FunctionContext`'s
/// trampoline (spec §3 "IgnoreRegistry" is explicitly process-wide, not
/// per-context).
pub fn ignore_registry() -> Arc<IgnoreRegistry> {
    Arc::clone(&table().ignore)
}
