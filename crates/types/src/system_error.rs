//! Thread-local OS "last error" indicator snapshotted at enter and
//! re-applied at leave (spec §3 "system_error", §4.5).

/// Read the calling thread's OS-level last-error indicator (`errno` on
/// Unix). Listeners observe and may rewrite this value between enter and
/// leave; `dispatch_leave` re-applies whatever value listeners settled on.
#[cfg(unix)]
pub fn get() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(unix)]
pub fn set(value: i32) {
    unsafe {
        *libc::__errno_location() = value;
    }
}

#[cfg(not(unix))]
pub fn get() -> i32 {
    0
}

#[cfg(not(unix))]
pub fn set(_value: i32) {}
