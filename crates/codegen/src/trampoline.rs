//! Trampoline cache and architecture dispatch.
//!
//! Mirrors the cache-then-compile shape of the teacher's
//! `vm::jit::Jit` (a `HashMap<CacheKey, JitEntry>` guarding a compiler
//! that's only ever invoked on a miss): here the key is the target
//! address plus the requested mode, and a "compile" is building one
//! architecture's trampoline pair instead of JIT-ing a trace. Unlike the
//! JIT's trace cache, entries are never evicted on failure — a
//! `WrongSignature` target will fail the exact same way on every call,
//! so there is nothing to cache about it and no `failed` set is needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use interceptor_types::{Address, InterceptError, Result};

use crate::slab::ExecutableSlab;
#[cfg(target_arch = "x86_64")]
use crate::x86_64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum CacheKey {
    Monitor(usize),
    Replace(usize),
}

/// Builds and caches trampolines for one process. One instance backs
/// the whole `Interceptor` façade; `interceptor-codegen` has no opinion
/// on how many `TrampolineBuilder`s a process should have, but there is
/// normally exactly one, matching the teacher's single `Jit` per `CPU`.
#[derive(Default)]
pub struct TrampolineBuilder {
    cache: Mutex<HashMap<CacheKey, Arc<ExecutableSlab>>>,
}

impl TrampolineBuilder {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Builds (or returns the cached) monitor-mode trampoline for
    /// `target`. `context_ptr`/`ignore_ptr` are the stable addresses of
    /// the owning `FunctionContext` and the process-wide
    /// `IgnoreRegistry`, obtained by the façade via `Arc::new_cyclic`.
    pub fn monitor_trampoline(&self, target: Address, context_ptr: u64, ignore_ptr: u64) -> Result<Arc<ExecutableSlab>> {
        let key = CacheKey::Monitor(target.as_usize());
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let slab = build_monitor(target, context_ptr, ignore_ptr)?;
        self.cache.lock().unwrap().insert(key, slab.clone());
        Ok(slab)
    }

    /// Builds (or returns the cached) replace-mode trampoline for
    /// `target`, redirecting into `replacement`.
    pub fn replace_trampoline(
        &self,
        target: Address,
        replacement: Address,
        context_ptr: u64,
        ignore_ptr: u64,
    ) -> Result<Arc<ExecutableSlab>> {
        let key = CacheKey::Replace(target.as_usize());
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let slab = build_replace(target, replacement, context_ptr, ignore_ptr)?;
        self.cache.lock().unwrap().insert(key, slab.clone());
        Ok(slab)
    }

    /// Drops a cached trampoline once its `FunctionContext` is torn down
    /// (detach/revert with no remaining listeners). The `Arc` handed
    /// back to callers earlier keeps the memory alive until they drop it
    /// too; this only stops new callers from reusing a stale slab if the
    /// same address is attached again later.
    pub fn evict(&self, target: Address) {
        let mut cache = self.cache.lock().unwrap();
        cache.remove(&CacheKey::Monitor(target.as_usize()));
        cache.remove(&CacheKey::Replace(target.as_usize()));
    }
}

#[cfg(target_arch = "x86_64")]
fn build_monitor(target: Address, context_ptr: u64, ignore_ptr: u64) -> Result<Arc<ExecutableSlab>> {
    x86_64::build_monitor_trampoline(target, context_ptr, ignore_ptr)
}

#[cfg(target_arch = "x86_64")]
fn build_replace(target: Address, replacement: Address, context_ptr: u64, ignore_ptr: u64) -> Result<Arc<ExecutableSlab>> {
    x86_64::build_replace_trampoline(target, replacement, context_ptr, ignore_ptr)
}

#[cfg(not(target_arch = "x86_64"))]
fn build_monitor(target: Address, _context_ptr: u64, _ignore_ptr: u64) -> Result<Arc<ExecutableSlab>> {
    Err(InterceptError::WrongSignature { address: target.as_usize(), offset: 0 })
}

#[cfg(not(target_arch = "x86_64"))]
fn build_replace(target: Address, _replacement: Address, _context_ptr: u64, _ignore_ptr: u64) -> Result<Arc<ExecutableSlab>> {
    Err(InterceptError::WrongSignature { address: target.as_usize(), offset: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_distinguishes_mode() {
        let a = CacheKey::Monitor(0x1000);
        let b = CacheKey::Replace(0x1000);
        assert_ne!(a, b);
    }
}
