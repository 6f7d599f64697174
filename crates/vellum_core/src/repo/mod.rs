//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for objects, entities and views.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes validate the model before any SQL mutation.
//! - Repository APIs return semantic errors (`NotFound`, `IdentityConflict`)
//!   in addition to DB transport errors.
//! - Repositories never open transactions; callers own them.

pub mod entity_repo;
pub mod object_repo;
pub mod view_repo;

pub use entity_repo::{EntityRepository, SqliteEntityRepository};
pub use object_repo::{ObjectRepository, RepoError, RepoResult, SqliteObjectRepository};
pub use view_repo::{SqliteViewRepository, ViewRepository, DEFAULT_VIEW_ID};
