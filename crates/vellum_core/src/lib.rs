//! Versioned, content-addressed record storage on SQLite.
//!
//! Records are split into immutable forms, shadows and commits, snapshotted
//! as versions and tracked per view through heads.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod record;
pub mod repo;
pub mod service;

pub use config::StoreConfig;
pub use db::{open_db, open_db_in_memory, open_with_config, DbError, DbResult};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, shutdown_logging,
    LoggingError,
};
pub use model::entity::{Head, Relations, Root, Version, View};
pub use model::object::{Commit, Form, FullObject, Shadow, ShadowAttribute};
pub use model::validation::ValidationError;
pub use record::{Entity, EntityState, Field, GenericRecord, MapperError, Record, StateToken};
pub use repo::{
    EntityRepository, ObjectRepository, RepoError, RepoResult, SqliteEntityRepository,
    SqliteObjectRepository, SqliteViewRepository, ViewRepository, DEFAULT_VIEW_ID,
};
pub use service::{EntityError, EntityManager, EntityResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
