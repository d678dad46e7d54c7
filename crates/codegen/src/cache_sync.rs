//! x86-64 instruction-cache synchronisation (spec §6 "Cache-sync
//! contract").
//!
//! x86 maintains instruction/data cache coherency for self-modifying
//! code in hardware (a `SFENCE`-adjacent serialising instruction is
//! enough to order the write before the next fetch); there is no
//! separate `icache` flush syscall the way there is on AArch64. This
//! reference implementation issues `CPUID` as a cheap, documented
//! serialising instruction and otherwise no-ops — still implementing
//! the contract so the trampoline builder's call site stays
//! architecture-neutral.

use interceptor_types::Address;

use crate::contract::CacheSync;

pub struct X86CacheSync;

impl CacheSync for X86CacheSync {
    fn clear_instruction_cache(&self, start: Address, len: usize) {
        log::trace!(
            "clear_instruction_cache: {:?}..+{} (serialising only, x86 snoops its own writes)",
            start,
            len
        );
        #[cfg(target_arch = "x86_64")]
        unsafe {
            std::arch::x86_64::__cpuid(0);
        }
    }
}
