//! Reference `CodeAllocator`: hands out page-granular executable memory
//! near a target address (spec §6; SPEC_FULL.md AMBIENT STACK, grounded
//! in `other_examples/e134e135_...midhook.rs.rs`'s `region::protect`
//! usage and confirmed against
//! `original_source/gum/backend-arm64/guminterceptor-arm64.c`'s
//! `gum_code_allocator_new_slice_near`).

use std::ptr::NonNull;
use std::sync::Arc;

use interceptor_types::{Address, InterceptError, Result};

use crate::contract::{CodeAllocator, ExecutableSlice};

const PAGE_SIZE: usize = 4096;
/// x86-64 `JMP rel32` reaches ±2 GiB; stay well inside that so a second
/// hop from the slab back to the target is also in range.
const NEAR_SEARCH_RADIUS: usize = 1 << 30;
const NEAR_SEARCH_STEP: usize = PAGE_SIZE * 16;

/// One executable page (or run of pages) holding a single built
/// trampoline. Implements `interceptor_state::OwnedSlab` so `state`'s
/// `FunctionContext` can own one without depending on this crate.
pub struct ExecutableSlab {
    base: NonNull<u8>,
    size: usize,
    entry: Address,
    original_prologue: Vec<u8>,
}

unsafe impl Send for ExecutableSlab {}
unsafe impl Sync for ExecutableSlab {}

impl ExecutableSlab {
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl interceptor_state::OwnedSlab for ExecutableSlab {
    fn entry(&self) -> Address {
        self.entry
    }

    fn original_prologue(&self) -> &[u8] {
        &self.original_prologue
    }
}

impl Drop for ExecutableSlab {
    fn drop(&mut self) {
        unsafe {
            let _ = region::free(self.base.as_ptr() as *mut _, self.size);
        }
    }
}

/// Reference near-address allocator. Best-effort: if no page within
/// `NEAR_SEARCH_RADIUS` of the target is free, falls back to an
/// unconstrained allocation and the builder uses the absolute-branch
/// sequence instead of a single relative jump (spec §4.1 edge case).
pub struct NearAllocator;

impl NearAllocator {
    pub fn new() -> Self {
        NearAllocator
    }
}

impl Default for NearAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a raw `ExecutableSlice` into the owning `ExecutableSlab`, once
/// the x86-64 builder has finished writing the trampoline into it.
/// `original_prologue` must have been captured from `target` before any
/// patching, so `revert` has a byte-exact copy (spec §3
/// "overwritten_prologue").
pub fn into_slab(slice: ExecutableSlice, entry: Address, original_prologue: Vec<u8>) -> Arc<ExecutableSlab> {
    Arc::new(ExecutableSlab {
        base: NonNull::new(slice.data.as_ptr()).expect("allocator never returns a null slice"),
        size: slice.size,
        entry,
        original_prologue,
    })
}

impl CodeAllocator for NearAllocator {
    fn allocate_slice_near(&self, near: Address, size: usize) -> Result<ExecutableSlice> {
        let size = size.next_multiple_of(PAGE_SIZE);
        let near_page = near.as_usize() & !(PAGE_SIZE - 1);

        let mut offset = NEAR_SEARCH_STEP;
        while offset <= NEAR_SEARCH_RADIUS {
            for candidate in [near_page.saturating_sub(offset), near_page + offset] {
                if let Ok(alloc) = try_map_at(candidate, size) {
                    return Ok(alloc);
                }
            }
            offset += NEAR_SEARCH_STEP;
        }

        log::debug!(
            "allocate_slice_near: no page within {:#x} of {:?}, falling back to unconstrained mmap",
            NEAR_SEARCH_RADIUS,
            near
        );
        map_anywhere(size)
    }

    fn free_slice(&self, slice: ExecutableSlice) {
        unsafe {
            let _ = region::free(slice.data.as_ptr() as *mut _, slice.size);
        }
    }
}

fn try_map_at(addr: usize, size: usize) -> std::result::Result<ExecutableSlice, ()> {
    #[cfg(unix)]
    {
        let ptr = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED || (addr != 0 && ptr as usize != addr) {
            if ptr != libc::MAP_FAILED {
                unsafe {
                    libc::munmap(ptr, size);
                }
            }
            return Err(());
        }
        Ok(ExecutableSlice {
            data: Address::from_ptr(ptr),
            size,
        })
    }
    #[cfg(not(unix))]
    {
        let _ = (addr, size);
        Err(())
    }
}

fn map_anywhere(size: usize) -> Result<ExecutableSlice> {
    let alloc = region::alloc(size, region::Protection::READ_WRITE_EXECUTE).map_err(|_| {
        InterceptError::PolicyViolation("code allocator: out of executable memory")
    })?;
    let data = Address::from_ptr(alloc.as_ptr::<u8>());
    std::mem::forget(alloc);
    Ok(ExecutableSlice { data, size })
}
