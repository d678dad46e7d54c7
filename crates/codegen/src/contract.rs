//! The architecture-neutral collaborator contract the trampoline builder
//! is written against (spec §6 "External Interfaces").
//!
//! These traits are the seam the spec explicitly keeps out of scope as a
//! "black-box capability with a stated contract": a real toolkit would
//! have one `InstructionWriter`/`Relocator` pair per ISA, one
//! `CodeAllocator` per OS/ISA combination, and one `CacheSync` per ISA.
//! This crate ships a complete x86-64 implementation of all four and
//! stubs AArch64 behind `cfg(target_arch = "aarch64")`.

use interceptor_types::{Address, Result};

/// Emits machine code into a destination cursor. Implementations are
/// ISA-specific; the trampoline builder only ever calls through this
/// trait, never emits raw bytes itself.
pub trait InstructionWriter {
    /// Bytes needed for an unconditional branch to `target`, preferring
    /// an immediate (PC-relative) form when `target` is in range of
    /// `from`, falling back to an absolute form otherwise.
    fn branch_footprint(&self, from: Address, target: Address) -> usize;

    /// Emit an unconditional branch from the current cursor to `target`.
    /// Returns the number of bytes written.
    fn emit_branch(&mut self, target: Address) -> Result<usize>;

    /// Emit a call into a Rust `extern "C"` function with up to the
    /// platform's integer argument-register count of word arguments.
    fn emit_call(&mut self, target: Address, args: &[u64]) -> Result<usize>;

    /// Current write position, i.e. where the next `emit_*` call will
    /// place its first byte.
    fn position(&self) -> Address;
}

/// Re-emits instructions originally written at one address so they run
/// correctly at another, fixing up PC-relative operands (spec §6,
/// "relocate instructions ... preserving semantics").
pub trait Relocator {
    /// Decode and re-encode whole instructions from `source`, stopping
    /// once at least `min_bytes` of the *original* instructions have
    /// been consumed, writing the relocated form at `dest`.
    ///
    /// Returns the number of original bytes consumed (the redirect
    /// footprint the caller must displace) and the number of bytes
    /// written at `dest`. Fails with `WrongSignature` — carrying the
    /// offset into `source` of the first un-relocatable instruction — if
    /// an instruction cannot be faithfully relocated (a relative call,
    /// an IP-relative memory operand whose displacement no longer fits,
    /// or an unsupported control-flow instruction).
    fn relocate(&self, source: Address, dest: Address, min_bytes: usize) -> Result<(usize, usize)>;

    /// True if a single instruction's byte length at `source` can always
    /// be determined without decoding past it (used by the builder to
    /// probe instruction boundaries one at a time when growing the
    /// redirect footprint).
    fn instruction_len(&self, source: Address) -> Result<usize>;
}

/// Hands out executable memory for trampolines (spec §6
/// "Code-allocator contract").
pub trait CodeAllocator {
    /// Allocate a slab close enough to `near` for a direct immediate
    /// branch where the ISA offers one; implementations that cannot
    /// satisfy proximity return a slab anyway and let the builder fall
    /// back to an absolute-branch sequence (spec §4.1 edge case).
    fn allocate_slice_near(&self, near: Address, size: usize) -> Result<ExecutableSlice>;

    fn free_slice(&self, slice: ExecutableSlice);
}

/// A raw, allocator-owned block of executable memory. Not `Drop`-managed
/// here deliberately: `codegen::slab::ExecutableSlab` is the owning type
/// that wraps one of these and frees it via `CodeAllocator::free_slice`.
pub struct ExecutableSlice {
    pub data: Address,
    pub size: usize,
}

/// Synchronises instruction fetch with data writes after patching code
/// (spec §6 "Cache-sync contract").
pub trait CacheSync {
    fn clear_instruction_cache(&self, start: Address, len: usize);
}
