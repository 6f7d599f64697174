//! Versioned record use-cases.
//!
//! # Responsibility
//! - Run the create/update/delete pipelines inside one immediate transaction.
//! - Resolve heads and commits into hydrated records for reads.
//!
//! # Invariants
//! - A failed write rolls back every row it inserted, including failures
//!   while hydrating the returned record.
//! - Updates never change the kind of an existing root.
//! - A record's `commit_id` is the id of the version it was saved as.
//! - Updates only branch from the version the active head points at.
//! - Relations stay pinned to the commit ids captured at save time.

use crate::model::entity::{Head, Root, Version};
use crate::model::object::FullObject;
use crate::model::validation::{require_id, ValidationError};
use crate::record::mapper::{from_generic, to_generic, MapperError};
use crate::record::{Entity, Identity, StampIdentity};
use crate::repo::{
    EntityRepository, ObjectRepository, RepoError, SqliteEntityRepository,
    SqliteObjectRepository,
};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type EntityResult<T> = Result<T, EntityError>;

/// Service error for versioned record use-cases.
#[derive(Debug)]
pub enum EntityError {
    /// A required field is missing or an entity invariant is violated.
    Validation(ValidationError),
    /// Insert of an entity that already carries a store-assigned id.
    IdentityConflict(&'static str),
    /// A member value could not be content-addressed.
    Encoding {
        field: String,
        source: serde_json::Error,
    },
    /// Record and stored form could not be mapped onto each other.
    Mapping(MapperError),
    /// No active head, or no version for a commit id.
    NotFound(String),
    /// The record was loaded from a version that is no longer the head.
    StaleCommit { expected: i64, found: i64 },
    /// Store failure at a named pipeline step.
    Persistence {
        step: &'static str,
        source: RepoError,
    },
}

impl EntityError {
    /// Stable machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::IdentityConflict(_) => "identity_conflict",
            Self::Encoding { .. } => "encoding",
            Self::Mapping(_) => "mapping",
            Self::NotFound(_) => "not_found",
            Self::StaleCommit { .. } => "stale_commit",
            Self::Persistence { .. } => "persistence",
        }
    }

    fn persistence(step: &'static str, source: impl Into<RepoError>) -> Self {
        Self::Persistence {
            step,
            source: source.into(),
        }
    }
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::IdentityConflict(entity) => {
                write!(f, "{entity} already has an id and cannot be inserted again")
            }
            Self::Encoding { field, source } => {
                write!(f, "unable to encode attribute `{field}`: {source}")
            }
            Self::Mapping(err) => write!(f, "{err}"),
            Self::NotFound(what) => write!(f, "{what} not found"),
            Self::StaleCommit { expected, found } => write!(
                f,
                "record was loaded from commit {found} but the head is at commit {expected}"
            ),
            Self::Persistence { step, source } => write!(f, "persistence failed at {step}: {source}"),
        }
    }
}

impl Error for EntityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Encoding { source, .. } => Some(source),
            Self::Mapping(err) => Some(err),
            Self::Persistence { source, .. } => Some(source),
            Self::IdentityConflict(_) | Self::NotFound(_) | Self::StaleCommit { .. } => None,
        }
    }
}

impl From<ValidationError> for EntityError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<MapperError> for EntityError {
    fn from(value: MapperError) -> Self {
        match value {
            MapperError::Encoding { field, source } => Self::Encoding { field, source },
            MapperError::Validation(err) => Self::Validation(err),
            other => Self::Mapping(other),
        }
    }
}

/// Maps a repository failure at `step` onto the service taxonomy.
fn at_step(step: &'static str) -> impl FnOnce(RepoError) -> EntityError {
    move |err| match err {
        RepoError::Validation(err) => EntityError::Validation(err),
        RepoError::IdentityConflict(entity) => EntityError::IdentityConflict(entity),
        RepoError::NotFound(what) => EntityError::NotFound(what),
        other => EntityError::persistence(step, other),
    }
}

/// Orchestrates versioned record storage over one borrowed connection.
pub struct EntityManager<'conn> {
    conn: &'conn Connection,
}

impl<'conn> EntityManager<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Saves `record` as a brand-new root in `view_id`.
    ///
    /// Identity fields already set on `record` are ignored. Returns a freshly
    /// hydrated record carrying the new identifier and commit id.
    pub fn create<R: Entity>(&self, record: &R, view_id: i64) -> EntityResult<R> {
        let started_at = Instant::now();
        let result = self.create_inner(record, view_id);
        match &result {
            Ok(created) => info!(
                "event=entity_create module=entity_manager status=ok kind={} root_id={} commit_id={} view_id={} duration_ms={}",
                created.kind(),
                created.identifier(),
                created.commit_id(),
                view_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("create", started_at, err),
        }
        result
    }

    fn create_inner<R: Entity>(&self, record: &R, view_id: i64) -> EntityResult<R> {
        require_id("Head", "view_id", view_id)?;
        let generic = to_generic(record)?;

        self.in_transaction("create", |conn| {
            let objects = SqliteObjectRepository::new(conn);
            let entities = SqliteEntityRepository::new(conn);

            let content = objects
                .insert_full_object(&generic.form, &generic.shadow, None)
                .map_err(at_step("insert_objects"))?;
            let version = entities
                .insert_version(&Version {
                    kind: generic.kind.clone(),
                    content_commit_id: content.commit.id,
                    relations: generic.relations.clone(),
                    ..Version::default()
                })
                .map_err(at_step("insert_version"))?;
            let root = entities
                .insert_root(&Root::new(generic.kind.clone()))
                .map_err(at_step("insert_root"))?;
            entities
                .insert_head(&Head {
                    root_id: root.id,
                    view_id,
                    version_id: version.id,
                    ..Head::default()
                })
                .map_err(at_step("insert_head"))?;

            hydrate(&content, &version, root.id, view_id)
        })
    }

    /// Loads the record that the active head of `(id, view_id)` points at.
    pub fn find<R: Entity>(&self, id: i64, view_id: i64) -> EntityResult<R> {
        let started_at = Instant::now();
        let result = self.find_inner(id, view_id);
        if let Err(err) = &result {
            log_failure("find", started_at, err);
        }
        result
    }

    fn find_inner<R: Entity>(&self, id: i64, view_id: i64) -> EntityResult<R> {
        let entities = SqliteEntityRepository::new(self.conn);
        let head = entities
            .get_active_head(id, view_id)
            .map_err(at_step("load_head"))?
            .ok_or_else(|| active_head_missing(id, view_id))?;
        let version = self.load_version(head.version_id)?;
        let content = self.load_content(&version)?;
        hydrate(&content, &version, id, view_id)
    }

    /// Loads the exact snapshot saved under `commit_id`, bypassing heads.
    ///
    /// This resolves pinned relations. The identifier is recovered from any
    /// head that ever pointed at the commit; the view id stays unset.
    pub fn find_by_commit<R: Entity>(&self, commit_id: i64) -> EntityResult<R> {
        let started_at = Instant::now();
        let result = self.find_by_commit_inner(commit_id);
        if let Err(err) = &result {
            log_failure("find_by_commit", started_at, err);
        }
        result
    }

    fn find_by_commit_inner<R: Entity>(&self, commit_id: i64) -> EntityResult<R> {
        let entities = SqliteEntityRepository::new(self.conn);
        let version = entities
            .get_version(commit_id)
            .map_err(at_step("load_version"))?
            .ok_or_else(|| EntityError::NotFound(format!("commit {commit_id}")))?;
        let root_id = entities
            .root_for_version(version.id)
            .map_err(at_step("load_head"))?
            .unwrap_or_default();
        let content = self.load_content(&version)?;
        hydrate(&content, &version, root_id, 0)
    }

    /// Saves a new version of `record` and moves its head forward.
    ///
    /// Fails with `StaleCommit` when the head moved since `record` was loaded.
    pub fn update<R: Entity>(&self, record: &R) -> EntityResult<R> {
        let started_at = Instant::now();
        let result = self.update_inner(record);
        match &result {
            Ok(updated) => info!(
                "event=entity_update module=entity_manager status=ok kind={} root_id={} parent_commit_id={} commit_id={} view_id={} duration_ms={}",
                updated.kind(),
                updated.identifier(),
                record.commit_id(),
                updated.commit_id(),
                updated.view_id(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("update", started_at, err),
        }
        result
    }

    fn update_inner<R: Entity>(&self, record: &R) -> EntityResult<R> {
        let root_id = record.identifier();
        let view_id = record.view_id();
        require_id("Record", "identifier", root_id)?;
        require_id("Record", "view_id", view_id)?;
        let generic = to_generic(record)?;

        self.in_transaction("update", |conn| {
            let objects = SqliteObjectRepository::new(conn);
            let entities = SqliteEntityRepository::new(conn);

            let head = entities
                .get_active_head(root_id, view_id)
                .map_err(at_step("load_head"))?
                .ok_or_else(|| active_head_missing(root_id, view_id))?;
            if head.version_id != record.commit_id() {
                return Err(EntityError::StaleCommit {
                    expected: head.version_id,
                    found: record.commit_id(),
                });
            }
            let root = entities
                .get_root(root_id)
                .map_err(at_step("load_root"))?
                .ok_or_else(|| EntityError::NotFound(format!("root {root_id}")))?;
            if root.kind != generic.kind {
                return Err(EntityError::Mapping(MapperError::KindMismatch {
                    expected: root.kind,
                    found: generic.kind.clone(),
                }));
            }
            let parent = entities
                .get_version(head.version_id)
                .map_err(at_step("load_version"))?
                .ok_or_else(|| dangling_head(&head))?;

            let content = objects
                .insert_full_object(
                    &generic.form,
                    &generic.shadow,
                    Some(parent.content_commit_id),
                )
                .map_err(at_step("insert_objects"))?;
            let version = entities
                .insert_version(&Version {
                    parent_id: Some(parent.id),
                    kind: generic.kind.clone(),
                    content_commit_id: content.commit.id,
                    relations: generic.relations.clone(),
                    ..Version::default()
                })
                .map_err(at_step("insert_version"))?;

            if !entities
                .archive_head(head.id)
                .map_err(at_step("archive_head"))?
            {
                return Err(EntityError::StaleCommit {
                    expected: head.version_id,
                    found: record.commit_id(),
                });
            }
            entities
                .insert_head(&Head {
                    root_id,
                    view_id,
                    version_id: version.id,
                    ..Head::default()
                })
                .map_err(at_step("insert_head"))?;

            hydrate(&content, &version, root_id, view_id)
        })
    }

    /// Archives the active head of `(id, view_id)`.
    ///
    /// The root is archived as well once no view has an active head left.
    /// Versions and content are retained.
    pub fn delete(&self, id: i64, view_id: i64) -> EntityResult<()> {
        let started_at = Instant::now();
        let result = self.in_transaction("delete", |conn| {
            let entities = SqliteEntityRepository::new(conn);
            let head = entities
                .get_active_head(id, view_id)
                .map_err(at_step("load_head"))?
                .ok_or_else(|| active_head_missing(id, view_id))?;
            if !entities
                .archive_head(head.id)
                .map_err(at_step("archive_head"))?
            {
                return Err(active_head_missing(id, view_id));
            }

            let remaining = entities
                .count_active_heads(id)
                .map_err(at_step("count_heads"))?;
            if remaining == 0 {
                entities.archive_root(id).map_err(at_step("archive_root"))?;
            }
            Ok(remaining)
        });

        match result {
            Ok(remaining) => {
                info!(
                    "event=entity_delete module=entity_manager status=ok root_id={} view_id={} remaining_heads={} duration_ms={}",
                    id,
                    view_id,
                    remaining,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                log_failure("delete", started_at, &err);
                Err(err)
            }
        }
    }

    /// Versions reachable from the active head of `(id, view_id)`, newest
    /// first.
    pub fn history(&self, id: i64, view_id: i64) -> EntityResult<Vec<Version>> {
        let entities = SqliteEntityRepository::new(self.conn);
        let head = entities
            .get_active_head(id, view_id)
            .map_err(at_step("load_head"))?
            .ok_or_else(|| active_head_missing(id, view_id))?;

        let mut versions = Vec::new();
        let mut next = Some(head.version_id);
        while let Some(version_id) = next {
            let version = self.load_version(version_id)?;
            next = version.parent_id;
            versions.push(version);
        }
        Ok(versions)
    }

    fn load_version(&self, version_id: i64) -> EntityResult<Version> {
        SqliteEntityRepository::new(self.conn)
            .get_version(version_id)
            .map_err(at_step("load_version"))?
            .ok_or_else(|| {
                EntityError::persistence(
                    "load_version",
                    RepoError::InvalidData(format!("version {version_id} is missing")),
                )
            })
    }

    fn load_content(&self, version: &Version) -> EntityResult<FullObject> {
        SqliteObjectRepository::new(self.conn)
            .get_full_object(version.content_commit_id)
            .map_err(at_step("load_content"))?
            .ok_or_else(|| {
                EntityError::persistence(
                    "load_content",
                    RepoError::InvalidData(format!(
                        "version {} points at missing commit {}",
                        version.id, version.content_commit_id
                    )),
                )
            })
    }

    /// Runs `body` inside one immediate transaction.
    ///
    /// Commits on success; rolls back explicitly and logs on failure.
    fn in_transaction<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&Connection) -> EntityResult<T>,
    ) -> EntityResult<T> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|err| EntityError::persistence("begin", err))?;

        match body(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|err| EntityError::persistence("commit", err))?;
                Ok(value)
            }
            Err(err) => {
                match tx.rollback() {
                    Ok(()) => warn!(
                        "event=entity_{} module=entity_manager status=rollback error_code={}",
                        operation,
                        err.code()
                    ),
                    Err(rollback_err) => error!(
                        "event=entity_{} module=entity_manager status=rollback_failed error_code={} error={}",
                        operation,
                        err.code(),
                        rollback_err
                    ),
                }
                Err(err)
            }
        }
    }
}

fn hydrate<R: Entity>(
    content: &FullObject,
    version: &Version,
    root_id: i64,
    view_id: i64,
) -> EntityResult<R> {
    let mut record: R = from_generic(&content.form, &content.shadow)?;
    record.stamp_identity(Identity {
        identifier: root_id,
        commit_id: version.id,
        view_id,
        relations: version.relations.clone(),
    });
    Ok(record)
}

fn active_head_missing(root_id: i64, view_id: i64) -> EntityError {
    EntityError::NotFound(format!("active head for root {root_id} in view {view_id}"))
}

fn dangling_head(head: &Head) -> EntityError {
    EntityError::persistence(
        "load_version",
        RepoError::InvalidData(format!(
            "head {} points at missing version {}",
            head.id, head.version_id
        )),
    )
}

fn log_failure(operation: &str, started_at: Instant, err: &EntityError) {
    match err {
        EntityError::Persistence { step, .. } => error!(
            "event=entity_{} module=entity_manager status=error step={} duration_ms={} error_code={} error={}",
            operation,
            step,
            started_at.elapsed().as_millis(),
            err.code(),
            err
        ),
        _ => warn!(
            "event=entity_{} module=entity_manager status=error duration_ms={} error_code={}",
            operation,
            started_at.elapsed().as_millis(),
            err.code()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{at_step, EntityError};
    use crate::db::DbError;
    use crate::model::validation::ValidationError;
    use crate::record::MapperError;
    use crate::repo::RepoError;

    #[test]
    fn repo_errors_keep_semantic_variants() {
        let not_found = at_step("load_head")(RepoError::NotFound("root 1".to_string()));
        assert!(matches!(not_found, EntityError::NotFound(what) if what == "root 1"));

        let conflict = at_step("insert_root")(RepoError::IdentityConflict("Root"));
        assert!(matches!(conflict, EntityError::IdentityConflict("Root")));

        let db = at_step("insert_head")(RepoError::Db(DbError::Sqlite(
            rusqlite::Error::QueryReturnedNoRows,
        )));
        assert!(matches!(db, EntityError::Persistence { step: "insert_head", .. }));
        assert_eq!(db.code(), "persistence");
    }

    #[test]
    fn mapper_errors_split_into_encoding_validation_and_mapping() {
        let validation: EntityError = MapperError::Validation(ValidationError::EmptyAttributeKey).into();
        assert!(matches!(validation, EntityError::Validation(ValidationError::EmptyAttributeKey)));

        let mapping: EntityError = MapperError::InvalidRecordKind("Bad".to_string()).into();
        assert!(matches!(mapping, EntityError::Mapping(MapperError::InvalidRecordKind(_))));
    }

    #[test]
    fn stale_commit_message_names_both_commits() {
        let err = EntityError::StaleCommit {
            expected: 7,
            found: 3,
        };
        assert_eq!(
            err.to_string(),
            "record was loaded from commit 3 but the head is at commit 7"
        );
    }
}
