//! AArch64 backend stub.
//!
//! The instruction set differs enough from x86-64 (fixed-width 32-bit
//! instructions, PC-relative literal pools, a dedicated link register
//! instead of an on-stack return address) that the x86-64 builder's
//! approach doesn't port by substitution — `original_source/gum/backend-
//! arm64/` builds its trampolines around `ARM64Writer`/`ARM64Relocator`
//! rather than `iced_x86`'s block encoder. Until that backend lands,
//! every entry point here fails closed with `WrongSignature` instead of
//! silently miscompiling a hook.

use interceptor_types::{Address, InterceptError, Result};

pub fn build_monitor_trampoline(target: Address, _context_ptr: u64, _ignore_ptr: u64) -> Result<()> {
    Err(unsupported(target))
}

pub fn build_replace_trampoline(
    target: Address,
    _replacement: Address,
    _context_ptr: u64,
    _ignore_ptr: u64,
) -> Result<()> {
    Err(unsupported(target))
}

fn unsupported(target: Address) -> InterceptError {
    InterceptError::WrongSignature {
        address: target.as_usize(),
        offset: 0,
    }
}
