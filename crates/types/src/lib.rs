//! Data model shared by the interception core's other crates: the address
//! and register types that flow from the trampoline builder through the
//! invocation state machine to the façade.

pub mod address;
pub mod cpu_context;
pub mod error;
pub mod system_error;
pub mod thread;

pub use address::Address;
pub use cpu_context::CpuContext;
pub use error::{InterceptError, Result};
pub use thread::ThreadId;
