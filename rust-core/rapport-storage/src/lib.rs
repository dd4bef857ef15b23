// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Rapport Storage
//
// Pluggable key-value storage for the relationship store. The
// `StorageBackend` trait is the contract backends implement; every
// statement is applied through `apply_batch` so that the rows written by
// one statement become visible together.
//
// # Modules
//
// - [`backend`] -- The `StorageBackend` trait and `WriteOp` batches.
// - [`error`] -- The `StorageError` enum.
// - [`memory`] -- An in-memory `BTreeMap` backend.
// - [`typed`] -- A serde-based table wrapper with namespace prefixing.

pub mod backend;
pub mod error;
pub mod memory;
pub mod typed;

pub use backend::{SharedBackend, StorageBackend, WriteOp};
pub use error::StorageError;
pub use memory::InMemoryBackend;
pub use typed::TypedStore;
