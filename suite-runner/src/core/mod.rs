//! Deterministic, pure logic shared by the suite runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (paths as strings, file contents as bytes, instants passed in by the
//! caller) and return deterministic outputs suitable for tests.

pub mod command;
pub mod decode;
pub mod path;
pub mod request;
pub mod tags;
pub mod types;
pub mod watchdog;
