//! End-to-end conformance tests for the function interception core.
//!
//! This crate has no code of its own — it plays the role `aTester` plays
//! in the teacher workspace, driving the public `interceptor` façade
//! against real, compiled x86-64 functions rather than unit-testing
//! individual modules in isolation. See `tests/scenarios.rs` for the
//! literal S1-S6 scenarios from spec.md §8 and the testable properties
//! they exercise.
