//! Literal end-to-end scenarios S1-S6 from spec.md §8, plus the
//! testable properties they stand in for, run against the real x86-64
//! trampoline backend. Every target here is `#[inline(never)]` so its
//! address is stable and its compiled prologue is the plain,
//! whole-instruction, no-IP-relative-operand shape the relocator
//! requires (spec §4.1 step "e") — the same assumption real hooking
//! crates like `retour`/`detour-rs` make about trivial target functions
//! in their own test suites.

#![cfg(target_arch = "x86_64")]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use interceptor::{Interceptor, InvocationContext, Listener};
use interceptor_types::Address;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// --- S1: Counting -----------------------------------------------------

#[inline(never)]
extern "C" fn s1_add(a: i64, b: i64) -> i64 {
    a + b
}

struct CountingListener(Arc<AtomicUsize>);

impl Listener for CountingListener {
    fn on_enter(&self, _ctx: &InvocationContext) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn s1_counting() {
    init();
    let target = Address(s1_add as usize);
    let interceptor = Interceptor::obtain();
    let counter = Arc::new(AtomicUsize::new(0));
    let listener: Arc<dyn Listener> = Arc::new(CountingListener(counter.clone()));
    interceptor.attach(target, listener.clone(), 0).unwrap();

    for _ in 0..1000 {
        assert_eq!(s1_add(2, 3), 5);
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    interceptor.detach(&listener);
}

// --- S2: Argument mutation ---------------------------------------------

#[inline(never)]
extern "C" fn s2_mul(a: i64, b: i64) -> i64 {
    a * b
}

struct SetArg1To10;

impl Listener for SetArg1To10 {
    fn on_enter(&self, ctx: &InvocationContext) {
        ctx.set_nth_argument(1, 10).unwrap();
    }
}

#[test]
fn s2_argument_mutation() {
    init();
    let target = Address(s2_mul as usize);
    let interceptor = Interceptor::obtain();
    let listener: Arc<dyn Listener> = Arc::new(SetArg1To10);
    interceptor.attach(target, listener.clone(), 0).unwrap();

    assert_eq!(s2_mul(7, 1), 70);

    interceptor.detach(&listener);
}

// --- S3: Return mutation -------------------------------------------------

#[inline(never)]
extern "C" fn s3_identity(x: i64) -> i64 {
    x
}

struct SetRetval42;

impl Listener for SetRetval42 {
    fn on_leave(&self, ctx: &InvocationContext) {
        ctx.set_return_value(42).unwrap();
    }
}

#[test]
fn s3_return_mutation() {
    init();
    let target = Address(s3_identity as usize);
    let interceptor = Interceptor::obtain();
    let listener: Arc<dyn Listener> = Arc::new(SetRetval42);
    interceptor.attach(target, listener.clone(), 0).unwrap();

    assert_eq!(s3_identity(1), 42);

    interceptor.detach(&listener);
}

// --- S4: Replace + call-original ----------------------------------------

#[inline(never)]
extern "C" fn s4_f(x: i64) -> i64 {
    x + 1
}

static S4_ORIGINAL_ENTRY: AtomicU64 = AtomicU64::new(0);
static S4_R_CALL_COUNT: AtomicUsize = AtomicUsize::new(0);

extern "C" fn s4_r(x: i64) -> i64 {
    S4_R_CALL_COUNT.fetch_add(1, Ordering::SeqCst);
    let entry = S4_ORIGINAL_ENTRY.load(Ordering::SeqCst) as usize;
    // SAFETY: `entry` was populated from `original_for_replace` before
    // any call to `s4_f` could reach this replacement.
    let original: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(entry) };
    original(x) * 2
}

#[test]
fn s4_replace_and_call_original() {
    init();
    let target = Address(s4_f as usize);
    let interceptor = Interceptor::obtain();

    interceptor.replace(target, Address(s4_r as usize)).unwrap();
    let entry = interceptor
        .original_for_replace(target)
        .expect("replace() must populate a callable original");
    S4_ORIGINAL_ENTRY.store(entry.as_usize() as u64, Ordering::SeqCst);

    assert_eq!(s4_f(3), 8);
    assert_eq!(S4_R_CALL_COUNT.load(Ordering::SeqCst), 1);

    interceptor.revert(target).unwrap();
}

// --- S5: Revert restores byte-identical ----------------------------------

#[inline(never)]
extern "C" fn s5_target(x: i64) -> i64 {
    x * 3
}

struct Noop;
impl Listener for Noop {}

#[test]
fn s5_revert_restores_original_bytes() {
    init();
    let addr = s5_target as usize;
    // SAFETY: reads 16 bytes of the target's own code, which is mapped
    // and readable for the lifetime of the process.
    let before: [u8; 16] = unsafe { std::ptr::read(addr as *const [u8; 16]) };

    let target = Address(addr);
    let interceptor = Interceptor::obtain();
    let listener: Arc<dyn Listener> = Arc::new(Noop);
    interceptor.attach(target, listener.clone(), 0).unwrap();
    assert_eq!(s5_target(7), 21);
    interceptor.detach(&listener);

    let after: [u8; 16] = unsafe { std::ptr::read(addr as *const [u8; 16]) };
    assert_eq!(before, after, "detach must restore the exact overwritten bytes");
}

// --- S6: Concurrent monitor ----------------------------------------------

#[inline(never)]
extern "C" fn s6_add(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

struct AtomicCounter(Arc<AtomicU64>);

impl Listener for AtomicCounter {
    fn on_enter(&self, _ctx: &InvocationContext) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn s6_concurrent_monitor() {
    init();
    let target = Address(s6_add as usize);
    let interceptor = Interceptor::obtain();
    let counter = Arc::new(AtomicU64::new(0));
    let listener: Arc<dyn Listener> = Arc::new(AtomicCounter(counter.clone()));
    interceptor.attach(target, listener.clone(), 0).unwrap();

    let handles: Vec<_> = (0..8i64)
        .map(|i| {
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    assert_eq!(s6_add(i, i), i + i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 80_000);
    interceptor.detach(&listener);
}

// --- Testable property 1: transparency -----------------------------------

#[inline(never)]
extern "C" fn transparency_target(x: i64) -> i64 {
    (x * 2) + 7
}

#[test]
fn property_transparency_with_no_mutating_listener() {
    init();
    let baseline: Vec<i64> = (0..16).map(transparency_target).collect();

    let target = Address(transparency_target as usize);
    let interceptor = Interceptor::obtain();
    let listener: Arc<dyn Listener> = Arc::new(Noop);
    interceptor.attach(target, listener.clone(), 0).unwrap();

    let instrumented: Vec<i64> = (0..16).map(transparency_target).collect();
    assert_eq!(baseline, instrumented);

    interceptor.detach(&listener);
}

// --- Testable property 6: nested attach idempotence ----------------------

#[inline(never)]
extern "C" fn idempotence_target(x: i64) -> i64 {
    x - 1
}

#[test]
fn property_nested_attach_is_idempotent() {
    init();
    let target = Address(idempotence_target as usize);
    let interceptor = Interceptor::obtain();
    let listener: Arc<dyn Listener> = Arc::new(Noop);

    interceptor.attach(target, listener.clone(), 0).unwrap();
    let err = interceptor
        .attach(target, listener.clone(), 0)
        .expect_err("attaching the same listener twice must be rejected");
    assert!(matches!(err, interceptor_types::InterceptError::AlreadyAttached { .. }));

    interceptor.detach(&listener);
    // A fresh attach after a full detach must succeed again.
    interceptor.attach(target, listener.clone(), 0).unwrap();
    interceptor.detach(&listener);
}
