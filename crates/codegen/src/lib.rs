//! Trampoline builder: the external code-writer/relocator/allocator
//! contract (spec §6) plus a complete x86-64 reference backend.
//!
//! `interceptor-state` owns the invocation state machine and never
//! mentions machine code; this crate is the other half — turning a
//! `FunctionContext`'s address and mode into an executable slab of
//! trampoline code that calls back into `interceptor_state::dispatch_*`,
//! and patching `target` itself to redirect into it. The two crates are
//! joined by `interceptor_state::OwnedSlab`, which `ExecutableSlab`
//! implements, and by the façade crate (`interceptor`), which is the
//! only thing that depends on both.
//!
//! `x86_64` is always built — `iced_x86` assembles x86 machine code
//! regardless of the host's own architecture — while `aarch64` is an
//! always-present stub that fails closed until a real AArch64 backend
//! lands. `trampoline::TrampolineBuilder` is the only place that picks
//! between them, and it does so on the build's own target architecture,
//! i.e. this reference implementation assumes the instrumented process
//! shares the host's ISA.

pub mod aarch64;
pub mod cache_sync;
pub mod contract;
pub mod patch;
pub mod slab;
pub mod trampoline;
pub mod x86_64;

pub use cache_sync::X86CacheSync;
pub use contract::{CacheSync, CodeAllocator, ExecutableSlice, InstructionWriter, Relocator};
pub use slab::{ExecutableSlab, NearAllocator};
pub use trampoline::TrampolineBuilder;
