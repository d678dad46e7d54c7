//! x86-64 `InstructionWriter`: the concrete implementation of the §6
//! "Code-writer" contract this backend ships, used wherever the builder
//! needs a plain branch or call emitted without the surrounding
//! context-save/restore choreography `builder.rs` hand-assembles for the
//! trampoline fragments themselves (spec §6, "emit branches ...; emit
//! calls with N argument registers").
//!
//! `activate`/`deactivate` in `patch.rs` is the one caller: rewriting
//! `target`'s prologue into a redirect is exactly "emit an unconditional
//! branch from the current cursor to `target`", nothing more, so it goes
//! through this trait rather than hand-rolling the immediate-vs-absolute
//! choice a second time.

use iced_x86::code_asm::*;

use interceptor_types::{Address, InterceptError, Result};

use crate::contract::InstructionWriter;
use crate::x86_64::relocate::{ABSOLUTE_REDIRECT_FOOTPRINT, MIN_REDIRECT_FOOTPRINT};

fn asm_err(_: iced_x86::IcedError) -> InterceptError {
    InterceptError::WrongSignature {
        address: 0,
        offset: 0,
    }
}

/// Assembles into a fixed destination address. Every `emit_*` call
/// appends to the same underlying `CodeAssembler`; `position()` reports
/// where the *next* call will land, computed from the bytes assembled
/// so far rather than tracked by hand.
pub struct X86Writer {
    origin: u64,
    asm: CodeAssembler,
}

impl X86Writer {
    pub fn new(origin: Address) -> Result<Self> {
        Ok(X86Writer {
            origin: origin.as_usize() as u64,
            asm: CodeAssembler::new(64).map_err(asm_err)?,
        })
    }

    /// Finishes assembly and returns the encoded bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.asm.assemble(self.origin).map_err(asm_err)
    }

    fn assembled_len(&self) -> usize {
        // `CodeAssembler` has no running length counter; re-assembling
        // against a scratch origin to measure is cheap next to the
        // one-shot, rarely-called paths this writer serves (patching a
        // single redirect, not a hot loop).
        self.asm
            .assemble(self.origin)
            .map(|bytes| bytes.len())
            .unwrap_or(0)
    }
}

impl InstructionWriter for X86Writer {
    /// `JMP rel32` reaches target addresses within `target - (from + 5)`
    /// of `i32`'s range; outside that, the absolute `movabs`+`jmp`
    /// sequence is required (spec §4.1, "falls back to absolute-branch
    /// sequences").
    fn branch_footprint(&self, from: Address, target: Address) -> usize {
        let rel = target.as_usize() as i64 - (from.as_usize() as i64 + MIN_REDIRECT_FOOTPRINT as i64);
        if rel >= i32::MIN as i64 && rel <= i32::MAX as i64 {
            MIN_REDIRECT_FOOTPRINT
        } else {
            ABSOLUTE_REDIRECT_FOOTPRINT
        }
    }

    fn emit_branch(&mut self, target: Address) -> Result<usize> {
        let from = Address(self.origin as usize + self.assembled_len());
        let footprint = self.branch_footprint(from, target);
        if footprint == MIN_REDIRECT_FOOTPRINT {
            self.asm.jmp(target.as_usize() as u64).map_err(asm_err)?;
        } else {
            self.asm.mov(r11, target.as_usize() as u64).map_err(asm_err)?;
            self.asm.jmp(r11).map_err(asm_err)?;
        }
        Ok(footprint)
    }

    fn emit_call(&mut self, target: Address, args: &[u64]) -> Result<usize> {
        const ARG_REGISTERS: [AsmRegister64; 6] = [rdi, rsi, rdx, rcx, r8, r9];
        if args.len() > ARG_REGISTERS.len() {
            return Err(InterceptError::PolicyViolation(
                "emit_call: more arguments than System V has integer registers for",
            ));
        }
        let before = self.assembled_len();
        for (&reg, &value) in ARG_REGISTERS.iter().zip(args) {
            self.asm.mov(reg, value).map_err(asm_err)?;
        }
        self.asm.mov(r11, target.as_usize() as u64).map_err(asm_err)?;
        self.asm.call(r11).map_err(asm_err)?;
        Ok(self.assembled_len() - before)
    }

    fn position(&self) -> Address {
        Address(self.origin as usize + self.assembled_len())
    }
}
