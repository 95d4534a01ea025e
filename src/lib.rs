//! Purpose: Library crate behind the `logwriter` producer and the `logwriter-ctl` operator tool.
//! Exports: `api` (stable surface) and `core` (records, files, named objects, write protocol).
//! Role: Keeps protocol logic testable with in-memory backends; binaries stay thin.
//! Invariants: Core modules take explicit handles; nothing looks up named objects implicitly.
pub mod api;
pub mod core;
