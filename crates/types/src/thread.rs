//! Thread identity used to key the ignore registry and invocation stacks
//! (spec §3 "IgnoreRegistry", §4.4).

use std::fmt;

/// A lightweight, copyable thread identity.
///
/// We key off the OS thread id rather than `std::thread::ThreadId` because
/// trampoline code may run on threads the Rust runtime never spawned (the
/// host process's own worker threads calling into an intercepted
/// function); the OS id is always available, while `std::thread::current()`
/// assumes a libstd-managed thread record.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId {
    #[cfg(target_os = "linux")]
    pub fn current() -> ThreadId {
        // SAFETY: gettid(2) has no preconditions and always succeeds.
        ThreadId(unsafe { libc::syscall(libc::SYS_gettid) } as u64)
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    pub fn current() -> ThreadId {
        ThreadId(unsafe { libc::pthread_self() } as u64)
    }

    #[cfg(not(unix))]
    pub fn current() -> ThreadId {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        ThreadId(hasher.finish())
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}
