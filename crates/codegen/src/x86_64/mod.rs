//! x86-64 System V reference backend: the only architecture this crate
//! builds trampolines for today (see `aarch64` for the not-yet-ported
//! stub).

mod builder;
pub(crate) mod relocate;
mod runtime;
mod writer;

pub use builder::{build_monitor_trampoline, build_replace_trampoline};
pub use relocate::X86Relocator;
pub use runtime::{interceptor_dispatch_enter, interceptor_dispatch_leave};
pub use writer::X86Writer;
