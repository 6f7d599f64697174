//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into record-level APIs.
//! - Own transaction boundaries; repositories never open their own.

pub mod entity_manager;

pub use entity_manager::{EntityError, EntityManager, EntityResult};
