//! Error codes surfaced across the interception core (spec §6, §7).

use thiserror::Error;

/// Errors an `Interceptor` operation or a stale invocation handle can report.
///
/// Every other internal failure (stack corruption detected at leave, an
/// allocator that hands back unusable memory) is treated as fatal and
/// panics rather than being represented here — see spec §7.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterceptError {
    /// The target's prologue could not be relocated into a trampoline.
    ///
    /// `offset` is the byte offset into the prologue where relocation
    /// first failed, so callers get more than the bare failure (see
    /// SPEC_FULL.md Open Question 2).
    #[error("function at {address:#x} has a prologue that cannot be relocated (failed at offset {offset})")]
    WrongSignature { address: usize, offset: usize },

    /// `attach` was called twice with the same (listener, user_data) pair
    /// at the same target, or `replace` was called on a target that
    /// already has enter-listeners attached.
    #[error("function at {address:#x} is already attached")]
    AlreadyAttached { address: usize },

    /// `replace` was called on a target that already has a replacement
    /// installed.
    #[error("function at {address:#x} is already replaced")]
    AlreadyReplaced { address: usize },

    /// An operation was rejected by a policy invariant (e.g. `revert` on
    /// a target that was never replaced).
    #[error("policy violation: {0}")]
    PolicyViolation(&'static str),

    /// An invocation-context accessor was used after its frame was popped.
    #[error("invocation context accessed after its frame was popped")]
    InvalidOperation,
}

pub type Result<T> = core::result::Result<T, InterceptError>;
