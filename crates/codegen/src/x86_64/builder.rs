//! x86-64 System V trampoline builder (spec §4.1).
//!
//! Builds the `on_enter`/`on_leave` trampoline pair described in
//! `_gum_function_context_make_monitor_trampoline` /
//! `_gum_function_context_make_replace_trampoline`
//! (SPEC_FULL.md SUPPLEMENTED section): save full context, call into the
//! dispatcher, restore context, then either resume the relocated
//! prologue or (replace mode, on `Proceed`) jump to the replacement.
//!
//! `dispatch_enter`'s outcome tells both modes whether a frame was
//! pushed for this call: `Proceed` always means one was, `Skip` always
//! means none was (the thread is ignored, or — replace mode only — this
//! is a re-entrant call from inside the replacement). Only a pushed
//! frame has a matching `on_leave_trampoline` to run, so both modes
//! branch on the outcome the same way: `Proceed` rewrites the saved
//! return-address slot to chain into `on_leave_trampoline` before
//! continuing (the redirect at `target` is a bare `jmp` — see
//! `patch::activate`/`X86Writer::emit_branch` — so nothing pushes that
//! slot for us; the trick has to happen here). `Skip` leaves the real
//! return address untouched and falls straight through. Replace mode's
//! `Proceed` additionally picks the replacement over the relocated
//! prologue as the thing to resume into; monitor mode only ever resumes
//! the relocated prologue.
//!
//! Two forward addresses aren't known until after this fragment is
//! assembled — where the relocated prologue ends up, and where
//! `on_leave_trampoline` ends up. Rather than patch machine-code
//! immediates after the fact, both are indirected through fixed data
//! slots at the front of the slab, whose addresses are known up front;
//! the slot *values* are filled in once assembly finishes computing
//! them.

use std::mem::offset_of;
use std::sync::Arc;

use iced_x86::code_asm::*;

use interceptor_types::{Address, CpuContext, InterceptError, Result};

use crate::contract::CodeAllocator;
use crate::slab::{into_slab, ExecutableSlab, NearAllocator};
use crate::x86_64::relocate::{X86Relocator, MIN_REDIRECT_FOOTPRINT};
use crate::x86_64::runtime::{interceptor_dispatch_enter, interceptor_dispatch_leave};

const CTX_SIZE: i32 = std::mem::size_of::<CpuContext>() as i32;
/// Reserves two extra words past the saved `CpuContext`: `OUTCOME_OFFSET`
/// for on_enter's dispatcher outcome, `LEAVE_RETURN_OFFSET` for
/// on_leave's recovered return address. Rounded to 16 for stack
/// alignment.
const FRAME_SIZE: i32 = (CTX_SIZE + 16 + 15) / 16 * 16;
const OUTCOME_OFFSET: i32 = CTX_SIZE;
/// Where on_leave stashes the real return address `dispatch_leave`
/// recovers, across `emit_restore_context` clobbering every GPR
/// (including the one the call returned it in) with the saved snapshot.
const LEAVE_RETURN_OFFSET: i32 = CTX_SIZE + 8;

/// Two forward-reference data slots (resume address, on_leave address)
/// ahead of the code.
const DATA_SLOTS_SIZE: usize = 16;
const SLOT_RESUME: usize = 0;
const SLOT_ON_LEAVE: usize = 8;

/// Slab size budget per trampoline: generous enough for both fragments
/// plus the relocated prologue and its trailing jump; unused tail bytes
/// are simply never executed.
const SLAB_SIZE: usize = 512;

macro_rules! ctx_offset {
    ($field:ident) => {
        offset_of!(CpuContext, $field) as i32
    };
}

fn asm_err(_: iced_x86::IcedError) -> InterceptError {
    InterceptError::WrongSignature {
        address: 0,
        offset: 0,
    }
}

fn load_imm64(a: &mut CodeAssembler, reg: AsmRegister64, value: u64) -> Result<()> {
    a.mov(reg, value).map_err(asm_err)
}

/// Loads the value stored at the fixed address `slot_addr` into `reg`.
/// Used for the "resume the relocated prologue" tail (both modes) and,
/// in replace mode, for loading `on_leave_trampoline`'s address.
fn load_from_slot(a: &mut CodeAssembler, reg: AsmRegister64, slot_addr: u64) -> Result<()> {
    load_imm64(a, reg, slot_addr)?;
    a.mov(reg, qword_ptr(reg)).map_err(asm_err)
}

fn emit_save_context(a: &mut CodeAssembler) -> Result<()> {
    a.sub(rsp, FRAME_SIZE).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rax), rax).map_err(asm_err)?;

    // rflags via pushfq/pop so we never need a third scratch register;
    // net stack effect is zero, so none of the offsets above shift.
    a.pushfq().map_err(asm_err)?;
    a.pop(rax).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rflags), rax).map_err(asm_err)?;

    a.mov(qword_ptr(rsp) + ctx_offset!(rcx), rcx).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rdx), rdx).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rbx), rbx).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rbp), rbp).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rsi), rsi).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rdi), rdi).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r8), r8).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r9), r9).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r10), r10).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r11), r11).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r12), r12).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r13), r13).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r14), r14).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(r15), r15).map_err(asm_err)?;

    // `rsp` field: the caller's stack pointer at the original call site.
    // A JMP into this trampoline (not a CALL) never touched it, so it's
    // just the current rsp plus everything reserved above.
    a.mov(rax, rsp).map_err(asm_err)?;
    a.add(rax, FRAME_SIZE).map_err(asm_err)?;
    a.mov(qword_ptr(rsp) + ctx_offset!(rsp), rax).map_err(asm_err)?;

    Ok(())
}

/// Restores every GPR from the saved `CpuContext` and drops the
/// reserved frame.
fn emit_restore_context(a: &mut CodeAssembler) -> Result<()> {
    a.mov(rax, qword_ptr(rsp) + ctx_offset!(rflags)).map_err(asm_err)?;
    a.push(rax).map_err(asm_err)?;
    a.popfq().map_err(asm_err)?;

    a.mov(rcx, qword_ptr(rsp) + ctx_offset!(rcx)).map_err(asm_err)?;
    a.mov(rdx, qword_ptr(rsp) + ctx_offset!(rdx)).map_err(asm_err)?;
    a.mov(rbx, qword_ptr(rsp) + ctx_offset!(rbx)).map_err(asm_err)?;
    a.mov(rbp, qword_ptr(rsp) + ctx_offset!(rbp)).map_err(asm_err)?;
    a.mov(rsi, qword_ptr(rsp) + ctx_offset!(rsi)).map_err(asm_err)?;
    a.mov(rdi, qword_ptr(rsp) + ctx_offset!(rdi)).map_err(asm_err)?;
    a.mov(r8, qword_ptr(rsp) + ctx_offset!(r8)).map_err(asm_err)?;
    a.mov(r9, qword_ptr(rsp) + ctx_offset!(r9)).map_err(asm_err)?;
    a.mov(r12, qword_ptr(rsp) + ctx_offset!(r12)).map_err(asm_err)?;
    a.mov(r13, qword_ptr(rsp) + ctx_offset!(r13)).map_err(asm_err)?;
    a.mov(r14, qword_ptr(rsp) + ctx_offset!(r14)).map_err(asm_err)?;
    a.mov(r15, qword_ptr(rsp) + ctx_offset!(r15)).map_err(asm_err)?;
    a.mov(rax, qword_ptr(rsp) + ctx_offset!(rax)).map_err(asm_err)?;
    a.mov(r10, qword_ptr(rsp) + ctx_offset!(r10)).map_err(asm_err)?;
    a.mov(r11, qword_ptr(rsp) + ctx_offset!(r11)).map_err(asm_err)?;

    a.add(rsp, FRAME_SIZE).map_err(asm_err)?;
    Ok(())
}

/// Build a monitor-mode trampoline: save context, run listeners via the
/// dispatcher, restore context, and resume the relocated prologue (spec
/// §4.1 monitor algorithm). A `Proceed` outcome first rewrites the saved
/// return-address slot to chain into `on_leave_trampoline`, which runs on
/// return from the relocated prologue: it saves context again, calls the
/// dispatcher for the leave side, restores context, and jumps to the
/// real caller. A `Skip` outcome (the thread is ignored) resumes the
/// relocated prologue with the return address untouched, bypassing
/// `on_leave_trampoline` entirely.
pub fn build_monitor_trampoline(target: Address, context_ptr: u64, ignore_ptr: u64) -> Result<Arc<ExecutableSlab>> {
    build_trampoline(target, None, context_ptr, ignore_ptr)
}

/// Build a replace-mode trampoline: same enter fragment, but a
/// `Proceed` outcome rewrites the saved return-address slot to land in
/// `on_leave_trampoline` and jumps to `replacement`; a `Skip` outcome
/// (the re-entrance guard tripping) resumes the relocated prologue with
/// the return address untouched, bypassing `on_leave_trampoline` exactly
/// as monitor mode's `Skip` path does (spec §4.1 replace algorithm).
pub fn build_replace_trampoline(
    target: Address,
    replacement: Address,
    context_ptr: u64,
    ignore_ptr: u64,
) -> Result<Arc<ExecutableSlab>> {
    build_trampoline(target, Some(replacement), context_ptr, ignore_ptr)
}

fn build_trampoline(
    target: Address,
    replacement: Option<Address>,
    context_ptr: u64,
    ignore_ptr: u64,
) -> Result<Arc<ExecutableSlab>> {
    let allocator = NearAllocator::new();
    let slice = allocator.allocate_slice_near(target, SLAB_SIZE)?;
    let slab_base = slice.data.as_usize() as u64;
    let slot_resume_addr = slab_base + SLOT_RESUME as u64;
    let slot_on_leave_addr = slab_base + SLOT_ON_LEAVE as u64;
    let code_base = slab_base + DATA_SLOTS_SIZE as u64;

    let mut on_enter = CodeAssembler::new(64).map_err(asm_err)?;
    emit_save_context(&mut on_enter)?;

    load_imm64(&mut on_enter, rdi, context_ptr)?;
    load_imm64(&mut on_enter, rsi, ignore_ptr)?;
    on_enter.mov(rdx, rsp).map_err(asm_err)?;
    on_enter.mov(rcx, rsp).map_err(asm_err)?;
    on_enter.add(rcx, FRAME_SIZE).map_err(asm_err)?;
    load_imm64(&mut on_enter, r11, interceptor_dispatch_enter as u64)?;
    on_enter.call(r11).map_err(asm_err)?;
    on_enter
        .mov(qword_ptr(rsp) + OUTCOME_OFFSET, rax)
        .map_err(asm_err)?;

    match replacement {
        None => {
            // Monitor mode: still resumes the relocated prologue either
            // way, but only a `Proceed` outcome (a frame was pushed)
            // gets the return-address rewrite — an ignored thread's call
            // must pass through untouched, with nothing to chain into
            // on_leave_trampoline for.
            on_enter.mov(r11, qword_ptr(rsp) + OUTCOME_OFFSET).map_err(asm_err)?;
            on_enter.test(r11, r11).map_err(asm_err)?;
            let mut skip_label = on_enter.create_label();
            on_enter.jz(skip_label).map_err(asm_err)?;

            // Proceed: chain the saved return-address slot into
            // on_leave_trampoline so the relocated prologue's own `ret`
            // runs leave-side bookkeeping before returning to the caller.
            on_enter.mov(r10, qword_ptr(rsp) + ctx_offset!(rsp)).map_err(asm_err)?;
            load_from_slot(&mut on_enter, r11, slot_on_leave_addr)?;
            on_enter.mov(qword_ptr(r10), r11).map_err(asm_err)?;

            on_enter.set_label(&mut skip_label).map_err(asm_err)?;
            emit_restore_context(&mut on_enter)?;
            load_from_slot(&mut on_enter, r11, slot_resume_addr)?;
            on_enter.jmp(r11).map_err(asm_err)?;
        }
        Some(replacement_addr) => {
            on_enter.mov(r11, qword_ptr(rsp) + OUTCOME_OFFSET).map_err(asm_err)?;
            on_enter.test(r11, r11).map_err(asm_err)?;
            let mut skip_label = on_enter.create_label();
            on_enter.jz(skip_label).map_err(asm_err)?;

            // Proceed: chain the saved return-address slot into
            // on_leave_trampoline, then jump to the replacement.
            on_enter.mov(r10, qword_ptr(rsp) + ctx_offset!(rsp)).map_err(asm_err)?;
            load_from_slot(&mut on_enter, r11, slot_on_leave_addr)?;
            on_enter.mov(qword_ptr(r10), r11).map_err(asm_err)?;
            emit_restore_context(&mut on_enter)?;
            load_imm64(&mut on_enter, r11, replacement_addr.as_usize() as u64)?;
            on_enter.jmp(r11).map_err(asm_err)?;

            // Skip: the re-entrance guard tripped; resume exactly as
            // monitor mode does.
            on_enter.set_label(&mut skip_label).map_err(asm_err)?;
            emit_restore_context(&mut on_enter)?;
            load_from_slot(&mut on_enter, r11, slot_resume_addr)?;
            on_enter.jmp(r11).map_err(asm_err)?;
        }
    }

    let on_enter_bytes = on_enter.assemble(code_base).map_err(asm_err)?;

    let on_leave_ip = code_base + on_enter_bytes.len() as u64;
    let mut on_leave = CodeAssembler::new(64).map_err(asm_err)?;
    emit_save_context(&mut on_leave)?;
    load_imm64(&mut on_leave, rdi, context_ptr)?;
    on_leave.mov(rsi, rsp).map_err(asm_err)?;
    load_imm64(&mut on_leave, r11, interceptor_dispatch_leave as u64)?;
    on_leave.call(r11).map_err(asm_err)?;
    // dispatch_leave returns (in rax) the real return address the
    // matching dispatch_enter call squirreled away before the on-stack
    // slot got overwritten to route here. Stash it before
    // emit_restore_context clobbers rax (and every other GPR) with the
    // saved CpuContext.
    on_leave.mov(qword_ptr(rsp) + LEAVE_RETURN_OFFSET, rax).map_err(asm_err)?;
    emit_restore_context(&mut on_leave)?;
    // The relocated prologue's own return (monitor) or the
    // replacement's return (replace) both land here via the rewritten
    // slot on_enter set up, which `ret` already consumed getting here —
    // there is nothing left on the real stack for a second `ret` to pop.
    // Recover the stashed value (now 8 bytes below the just-restored
    // `rsp`, since the frame holding it was deallocated) and jump there.
    on_leave.mov(r11, qword_ptr(rsp) - (FRAME_SIZE - LEAVE_RETURN_OFFSET)).map_err(asm_err)?;
    on_leave.jmp(r11).map_err(asm_err)?;
    let on_leave_bytes = on_leave.assemble(on_leave_ip).map_err(asm_err)?;

    let prologue_dest = Address((on_leave_ip + on_leave_bytes.len() as u64) as usize);

    unsafe {
        std::ptr::copy_nonoverlapping(on_enter_bytes.as_ptr(), code_base as *mut u8, on_enter_bytes.len());
        std::ptr::copy_nonoverlapping(on_leave_bytes.as_ptr(), on_leave_ip as *mut u8, on_leave_bytes.len());
    }

    // Capture the original bytes before any patching touches `target`.
    let original_bytes = unsafe { std::slice::from_raw_parts(target.as_ptr() as *const u8, 32).to_vec() };

    let relocator = X86Relocator;
    let (consumed, relocated_len) = relocator.relocate(target, prologue_dest, MIN_REDIRECT_FOOTPRINT)?;
    let original_prologue = original_bytes[..consumed].to_vec();

    // Trailing jump from the relocated prologue back into the original
    // function, just past the bytes the redirect will overwrite.
    let mut tail = CodeAssembler::new(64).map_err(asm_err)?;
    let resume_at = target.as_usize() as u64 + consumed as u64;
    load_imm64(&mut tail, r11, resume_at)?;
    tail.jmp(r11).map_err(asm_err)?;
    let tail_ip = prologue_dest.as_usize() as u64 + relocated_len as u64;
    let tail_bytes = tail.assemble(tail_ip).map_err(asm_err)?;
    unsafe {
        std::ptr::copy_nonoverlapping(tail_bytes.as_ptr(), tail_ip as *mut u8, tail_bytes.len());
    }

    unsafe {
        (slot_resume_addr as *mut u64).write_unaligned(prologue_dest.as_usize() as u64);
        (slot_on_leave_addr as *mut u64).write_unaligned(on_leave_ip);
    }

    let entry = Address(code_base as usize);
    Ok(into_slab(slice, entry, original_prologue))
}
