//! Invocation state machine for the function interception core: the
//! per-thread call stack, the listener/context surface attached functions
//! expose to observers, the ignore registry, and the transaction protocol
//! that batches attach/detach/replace/revert against concurrent
//! trampoline execution.
//!
//! This crate holds everything that must be reachable from inside a live
//! trampoline (`dispatch_enter`/`dispatch_leave`, the ignore check) as
//! well as everything the façade in `interceptor` needs to drive it. It
//! does not know how trampolines are built; that is `codegen`'s job. The
//! `OwnedSlab` trait here is the seam between the two: `codegen` provides
//! the concrete executable-memory type, `state` only needs to hold it and
//! free it.

pub mod context;
pub mod dispatch;
pub mod frame;
pub mod ignore;
pub mod listener;
pub mod slab;
pub mod transaction;

pub use context::{FunctionContext, ListenerHandle, Mode};
pub use dispatch::{dispatch_enter, dispatch_leave, DispatchOutcome};
pub use frame::{InvocationFrame, InvocationStack};
pub use ignore::IgnoreRegistry;
pub use listener::{InvocationContext, Listener, ListenerId};
pub use slab::OwnedSlab;
pub use transaction::Transaction;
