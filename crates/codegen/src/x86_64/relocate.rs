//! x86-64 prologue relocator: decode whole instructions at the target,
//! re-encode them at the trampoline cursor, and fail with the offset of
//! the first instruction that cannot be faithfully relocated (spec
//! §4.1 step "e"; SPEC_FULL.md AMBIENT STACK, grounded in
//! `other_examples/811fce8f_...function_hook.rs.rs`'s use of
//! `iced_x86::{Decoder, BlockEncoder, InstructionBlock}` for exactly
//! this purpose).

use iced_x86::{BlockEncoder, BlockEncoderOptions, Decoder, DecoderOptions, FlowControl, Instruction, InstructionBlock};

use interceptor_types::{Address, InterceptError, Result};

use crate::contract::Relocator;

/// Minimum immediate-branch redirect footprint: a 5-byte `JMP rel32`.
/// The builder grows past this one instruction at a time when an
/// instruction straddles the boundary (spec §4.1 step "d").
pub const MIN_REDIRECT_FOOTPRINT: usize = 5;

/// Bytes needed for the absolute fallback: `movabs rax, imm64; jmp rax`
/// (10 + 2 bytes).
pub const ABSOLUTE_REDIRECT_FOOTPRINT: usize = 12;

pub struct X86Relocator;

impl X86Relocator {
    /// Decode whole instructions at `source` until at least `min_bytes`
    /// of original bytes have been consumed, rejecting any instruction
    /// this relocator cannot safely move (spec SUPPLEMENTED section:
    /// the same `FlowControl` triage as the grounding file — `Next`/
    /// `Return` relocate cleanly; calls and branches do not, because a
    /// relative operand computed for the original address would be
    /// wrong once re-emitted at the trampoline).
    fn decode_prologue(&self, source: Address, min_bytes: usize) -> Result<Vec<Instruction>> {
        // Read generously past `min_bytes` so a final long instruction
        // that straddles the boundary still decodes whole.
        let read_len = usize::max(min_bytes * 2, 32);
        let bytes = unsafe {
            std::slice::from_raw_parts(source.as_ptr() as *const u8, read_len)
        };

        let mut decoder = Decoder::with_ip(64, bytes, source.as_usize() as u64, DecoderOptions::NONE);
        let mut instructions = Vec::new();
        let mut consumed = 0usize;

        while consumed < min_bytes {
            if decoder.position() >= bytes.len() {
                return Err(InterceptError::WrongSignature {
                    address: source.as_usize(),
                    offset: consumed,
                });
            }
            let instr = decoder.decode();
            if instr.is_invalid() {
                return Err(InterceptError::WrongSignature {
                    address: source.as_usize(),
                    offset: consumed,
                });
            }
            if instr.is_ip_rel_memory_operand() {
                return Err(InterceptError::WrongSignature {
                    address: source.as_usize(),
                    offset: consumed,
                });
            }
            match instr.flow_control() {
                FlowControl::Next | FlowControl::Return => {}
                _ => {
                    return Err(InterceptError::WrongSignature {
                        address: source.as_usize(),
                        offset: consumed,
                    })
                }
            }
            consumed += instr.len();
            instructions.push(instr);
        }

        Ok(instructions)
    }
}

impl Relocator for X86Relocator {
    fn relocate(&self, source: Address, dest: Address, min_bytes: usize) -> Result<(usize, usize)> {
        let instructions = self.decode_prologue(source, min_bytes)?;
        let consumed = instructions.iter().map(Instruction::len).sum();

        let block = InstructionBlock::new(&instructions, dest.as_usize() as u64);
        let encoded = BlockEncoder::encode(64, block, BlockEncoderOptions::NONE).map_err(|_| {
            InterceptError::WrongSignature {
                address: source.as_usize(),
                offset: 0,
            }
        })?;

        let out = encoded.code_buffer;
        unsafe {
            std::ptr::copy_nonoverlapping(out.as_ptr(), dest.as_ptr(), out.len());
        }

        Ok((consumed, out.len()))
    }

    fn instruction_len(&self, source: Address) -> Result<usize> {
        let bytes = unsafe { std::slice::from_raw_parts(source.as_ptr() as *const u8, 16) };
        let mut decoder = Decoder::with_ip(64, bytes, source.as_usize() as u64, DecoderOptions::NONE);
        let instr = decoder.decode();
        if instr.is_invalid() {
            return Err(InterceptError::WrongSignature {
                address: source.as_usize(),
                offset: 0,
            });
        }
        Ok(instr.len())
    }
}
