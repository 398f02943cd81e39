//! Shared harness for end-to-end sync scenarios.

pub mod harness;
