//! Saved register snapshot handed to enter/leave listeners (spec §4.5,
//! "cpu_context").
//!
//! Field order here is the order the x86-64 trampoline in `codegen` pushes
//! and pops registers in; it is an internal contract between this struct
//! and the trampoline builder, not an ABI anyone outside this workspace
//! needs to match.

/// The System V AMD64 integer argument registers, in argument order.
pub const SYSV_ARG_REGISTERS: usize = 6;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuContext {
    pub rip: u64,
    pub rflags: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
}

impl CpuContext {
    /// Number of 64-bit words this context occupies on the trampoline's
    /// save area. Used by the trampoline builder to compute stack offsets.
    pub const WORD_COUNT: usize = core::mem::size_of::<CpuContext>() / 8;

    /// Read the nth integer argument register (0-based), following the
    /// System V AMD64 calling convention: rdi, rsi, rdx, rcx, r8, r9.
    ///
    /// Returns `None` for `n >= SYSV_ARG_REGISTERS`; the caller (the
    /// invocation context in `interceptor`) falls back to the saved stack
    /// for those, per spec §4.5.
    pub fn register_argument(&self, n: usize) -> Option<u64> {
        match n {
            0 => Some(self.rdi),
            1 => Some(self.rsi),
            2 => Some(self.rdx),
            3 => Some(self.rcx),
            4 => Some(self.r8),
            5 => Some(self.r9),
            _ => None,
        }
    }

    pub fn set_register_argument(&mut self, n: usize, value: u64) -> bool {
        match n {
            0 => self.rdi = value,
            1 => self.rsi = value,
            2 => self.rdx = value,
            3 => self.rcx = value,
            4 => self.r8 = value,
            5 => self.r9 = value,
            _ => return false,
        }
        true
    }

    #[inline]
    pub fn return_value(&self) -> u64 {
        self.rax
    }

    #[inline]
    pub fn set_return_value(&mut self, value: u64) {
        self.rax = value;
    }

    #[inline]
    pub fn program_counter(&self) -> u64 {
        self.rip
    }

    #[inline]
    pub fn stack_pointer(&self) -> u64 {
        self.rsp
    }
}
