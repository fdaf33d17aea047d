// src/resilience/tests/mod.rs
//! Tests for retry, backoff and circuit breaking

mod retry_tests;
