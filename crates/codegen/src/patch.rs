//! Activating and deactivating a `FunctionContext`'s redirect: the
//! actual overwrite of `target`'s prologue with a jump into the built
//! trampoline, and its inverse (spec §4.3 "activates"/"deactivates";
//! SPEC_FULL.md SUPPLEMENTED section, `gum_interceptor_activate`'s
//! `mprotect`-then-patch-then-restore dance).
//!
//! Building a trampoline (`x86_64::build_*_trampoline`) never touches
//! `target` itself — it only relocates a *copy* of the prologue into the
//! slab. Patching `target` is a separate, later step so the façade can
//! build first and only flip the switch once the whole transaction is
//! ready to commit.

use interceptor_types::{Address, InterceptError, Result};

use crate::contract::{CacheSync, InstructionWriter};
use crate::x86_64::X86Writer;

/// Overwrites `target`'s first few instructions with an unconditional
/// jump to `entry`, the trampoline built for it. `prologue_len` must be
/// at least the footprint this writes (the `Relocator` already grew it
/// to fit during the build, per spec §4.1 step "d").
pub fn activate(target: Address, entry: Address, prologue_len: usize) -> Result<()> {
    let redirect = encode_redirect(target, entry)?;
    if redirect.len() > prologue_len {
        return Err(InterceptError::WrongSignature {
            address: target.as_usize(),
            offset: prologue_len,
        });
    }
    write_bytes(target, &redirect)
}

/// Writes `original` back over `target`, undoing `activate` byte for
/// byte (spec testable property S5, "revert restores byte-identical").
pub fn deactivate(target: Address, original: &[u8]) -> Result<()> {
    write_bytes(target, original)
}

fn encode_redirect(target: Address, entry: Address) -> Result<Vec<u8>> {
    let mut writer = X86Writer::new(target)?;
    writer.emit_branch(entry)?;
    writer.finish()
}

fn write_bytes(target: Address, bytes: &[u8]) -> Result<()> {
    let page = target.as_usize() & !(region_page_mask());
    let span = (target.as_usize() + bytes.len()) - page;
    unsafe {
        region::protect(page as *const (), span, region::Protection::READ_WRITE_EXECUTE)
            .map_err(|_| InterceptError::PolicyViolation("patch: failed to make target page writable"))?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), target.as_ptr(), bytes.len());
        let _ = region::protect(page as *const (), span, region::Protection::READ_EXECUTE);
    }
    crate::cache_sync::X86CacheSync.clear_instruction_cache(target, bytes.len());
    Ok(())
}

fn region_page_mask() -> usize {
    region::page::size() - 1
}
