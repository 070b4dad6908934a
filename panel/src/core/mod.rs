//! Deterministic, pure logic shared by the host and the view.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod message;
pub mod types;
pub mod ui_state;
