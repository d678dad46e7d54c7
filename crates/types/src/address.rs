//! A native code address, treated as opaque bytes plus a stable identity
//! (spec §3, "Target").

use std::fmt;

/// An executable address owned by the host process.
///
/// `Address` is `Copy`/`Send`/`Sync` even though it wraps a raw pointer:
/// the pointee is code belonging to the host process, not Rust-managed
/// memory, and every access to it goes through the allocator/writer
/// contracts in `codegen`, not through this type directly.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub usize);

impl Address {
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }

    #[inline]
    pub fn offset(self, delta: isize) -> Address {
        Address((self.0 as isize + delta) as usize)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
