//! Root, version and head persistence.
//!
//! # Responsibility
//! - Persist record identities (roots), immutable snapshots (versions) and
//!   per-view pointers (heads).
//! - Provide the compare-and-swap head archive used by updates.
//!
//! # Invariants
//! - A version's kind matches the kind of its content commit's form.
//! - At most one non-archived head exists per `(root_id, view_id)`.
//! - Heads are archived, never rewritten.

use crate::model::entity::{Head, Root, Version};
use crate::model::validation::ValidationError;
use crate::repo::object_repo::{decode_document, encode_document, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const ROOT_COLUMNS: &str = "id, kind, created_at, archived_at";
const VERSION_COLUMNS: &str = "id, parent_id, kind, content_commit_id, relations, created_at";
const HEAD_COLUMNS: &str = "id, root_id, view_id, version_id, created_at, updated_at, archived_at";

/// Repository interface for entity identity and branching.
pub trait EntityRepository {
    fn insert_root(&self, root: &Root) -> RepoResult<Root>;
    fn get_root(&self, id: i64) -> RepoResult<Option<Root>>;
    /// Sets `archived_at` on an active root.
    fn archive_root(&self, id: i64) -> RepoResult<()>;

    fn insert_version(&self, version: &Version) -> RepoResult<Version>;
    fn get_version(&self, id: i64) -> RepoResult<Option<Version>>;

    fn insert_head(&self, head: &Head) -> RepoResult<Head>;
    fn get_active_head(&self, root_id: i64, view_id: i64) -> RepoResult<Option<Head>>;
    /// Archives `head_id` only if it is still active.
    ///
    /// Returns `false` when another writer archived it first.
    fn archive_head(&self, head_id: i64) -> RepoResult<bool>;
    fn count_active_heads(&self, root_id: i64) -> RepoResult<i64>;

    /// Root of the most recent head (active or archived) that pointed at
    /// `version_id`.
    fn root_for_version(&self, version_id: i64) -> RepoResult<Option<i64>>;
}

/// SQLite-backed entity repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn content_kind(&self, commit_id: i64) -> RepoResult<Option<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT forms.kind
             FROM commits
             JOIN forms ON forms.id = commits.form_id
             WHERE commits.id = ?1;",
        )?;
        let mut rows = stmt.query(params![commit_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }
        Ok(None)
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn insert_root(&self, root: &Root) -> RepoResult<Root> {
        if root.id != 0 {
            return Err(RepoError::IdentityConflict("Root"));
        }
        root.validate()?;

        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO roots (kind) VALUES (?1) RETURNING {ROOT_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params![root.kind.as_str()])?;
        match rows.next()? {
            Some(row) => parse_root_row(row),
            None => Err(RepoError::InvalidData("root insert returned no row".to_string())),
        }
    }

    fn get_root(&self, id: i64) -> RepoResult<Option<Root>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ROOT_COLUMNS} FROM roots WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_root_row(row)?));
        }
        Ok(None)
    }

    fn archive_root(&self, id: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE roots
             SET archived_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND archived_at IS NULL;",
            params![id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(format!("active root {id}")));
        }
        Ok(())
    }

    fn insert_version(&self, version: &Version) -> RepoResult<Version> {
        if version.id != 0 {
            return Err(RepoError::IdentityConflict("Version"));
        }
        version.validate()?;

        let content_kind = self
            .content_kind(version.content_commit_id)?
            .ok_or_else(|| RepoError::NotFound(format!("commit {}", version.content_commit_id)))?;
        if content_kind != version.kind {
            return Err(ValidationError::KindMismatch {
                expected: version.kind.clone(),
                found: content_kind,
            }
            .into());
        }

        let relations = encode_document(&version.relations)?;
        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO versions (parent_id, kind, content_commit_id, relations)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING {VERSION_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params![
            version.parent_id,
            version.kind.as_str(),
            version.content_commit_id,
            relations,
        ])?;
        match rows.next()? {
            Some(row) => parse_version_row(row),
            None => Err(RepoError::InvalidData("version insert returned no row".to_string())),
        }
    }

    fn get_version(&self, id: i64) -> RepoResult<Option<Version>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {VERSION_COLUMNS} FROM versions WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_version_row(row)?));
        }
        Ok(None)
    }

    fn insert_head(&self, head: &Head) -> RepoResult<Head> {
        if head.id != 0 {
            return Err(RepoError::IdentityConflict("Head"));
        }
        head.validate()?;

        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO heads (root_id, view_id, version_id)
             VALUES (?1, ?2, ?3)
             RETURNING {HEAD_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params![head.root_id, head.view_id, head.version_id])?;
        match rows.next()? {
            Some(row) => parse_head_row(row),
            None => Err(RepoError::InvalidData("head insert returned no row".to_string())),
        }
    }

    fn get_active_head(&self, root_id: i64, view_id: i64) -> RepoResult<Option<Head>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HEAD_COLUMNS}
             FROM heads
             WHERE root_id = ?1
               AND view_id = ?2
               AND archived_at IS NULL;"
        ))?;
        let mut rows = stmt.query(params![root_id, view_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_head_row(row)?));
        }
        Ok(None)
    }

    fn archive_head(&self, head_id: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE heads
             SET archived_at = (strftime('%s', 'now') * 1000),
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND archived_at IS NULL;",
            params![head_id],
        )?;
        Ok(changed == 1)
    }

    fn count_active_heads(&self, root_id: i64) -> RepoResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM heads WHERE root_id = ?1 AND archived_at IS NULL;",
            params![root_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn root_for_version(&self, version_id: i64) -> RepoResult<Option<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT root_id
             FROM heads
             WHERE version_id = ?1
             ORDER BY id DESC
             LIMIT 1;",
        )?;
        let mut rows = stmt.query(params![version_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }
        Ok(None)
    }
}

fn parse_root_row(row: &Row<'_>) -> RepoResult<Root> {
    Ok(Root {
        id: row.get(0)?,
        kind: row.get(1)?,
        created_at: row.get(2)?,
        archived_at: row.get(3)?,
    })
}

fn parse_version_row(row: &Row<'_>) -> RepoResult<Version> {
    let id: i64 = row.get(0)?;
    let raw: String = row.get(4)?;
    Ok(Version {
        id,
        parent_id: row.get(1)?,
        kind: row.get(2)?,
        content_commit_id: row.get(3)?,
        relations: decode_document("version", id, &raw)?,
        created_at: row.get(5)?,
    })
}

fn parse_head_row(row: &Row<'_>) -> RepoResult<Head> {
    Ok(Head {
        id: row.get(0)?,
        root_id: row.get(1)?,
        view_id: row.get(2)?,
        version_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        archived_at: row.get(6)?,
    })
}
