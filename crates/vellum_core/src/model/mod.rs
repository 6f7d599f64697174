//! Generic versioned-object model.
//!
//! # Responsibility
//! - Define the persisted shapes: forms, shadows, commits, roots, versions,
//!   heads and views.
//! - Validate per-entity invariants before any write.
//!
//! # Invariants
//! - Forms, shadows, commits and versions are immutable once inserted.
//! - Heads are replaced, never edited in place.

pub mod entity;
pub mod object;
pub mod validation;
