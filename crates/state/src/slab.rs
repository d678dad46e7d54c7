//! Seam between this crate and `codegen`: a `FunctionContext` owns a
//! built trampoline, but has no business knowing how executable memory
//! was allocated or laid out. `codegen` implements this trait for its
//! concrete slab type so `state` can hold one without depending on
//! `codegen` (which depends on `state`, not the reverse).

use interceptor_types::Address;

/// A block of executable memory holding one trampoline, owned by the
/// `FunctionContext` it belongs to and freed when that context is
/// dropped (spec §4.1, trampoline lifetime).
pub trait OwnedSlab: Send + Sync {
    /// Entry point code at `Target` should jump to once the trampoline is
    /// activated.
    fn entry(&self) -> Address;

    /// The original bytes this trampoline's prologue overwrote, for
    /// `revert` to restore verbatim (spec §4.3, "revert").
    fn original_prologue(&self) -> &[u8];
}
