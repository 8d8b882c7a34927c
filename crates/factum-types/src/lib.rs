//! Factum Types
//!
//! This crate defines the core value type shared throughout the `factum`
//! fact-indexing ecosystem (`factum-core` and `factum-calculator`). It holds
//! `FactValue`, the scalar type backing every fact and index-entry payload,
//! and exists to eliminate circular dependencies between the two crates.

#![warn(missing_docs)]

mod types;
pub use types::FactValue;
