//! Object repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist immutable forms, shadows and commits.
//! - Load a commit together with its form and shadow.
//!
//! # Invariants
//! - Inserts reject entities that already carry an id.
//! - Every shadow ref must resolve in the stored form before insert.
//! - Read paths reject undecodable attribute documents instead of masking them.

use crate::db::DbError;
use crate::model::object::{Commit, Form, FullObject, Shadow};
use crate::model::validation::ValidationError;
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const FORM_COLUMNS: &str = "id, kind, attributes, created_at, updated_at";
const SHADOW_COLUMNS: &str = "id, form_id, attributes, created_at";
const COMMIT_COLUMNS: &str = "id, form_id, shadow_id, previous_id, created_at";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by object, entity and view persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    /// Insert of an entity that already has a store-assigned id.
    IdentityConflict(&'static str),
    Db(DbError),
    NotFound(String),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::IdentityConflict(entity) => {
                write!(f, "{entity} already has an id and cannot be inserted again")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(what) => write!(f, "{what} not found"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::IdentityConflict(_) | Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for content-addressed object storage.
pub trait ObjectRepository {
    fn insert_form(&self, form: &Form) -> RepoResult<Form>;
    fn insert_shadow(&self, shadow: &Shadow) -> RepoResult<Shadow>;
    fn insert_commit(&self, commit: &Commit) -> RepoResult<Commit>;
    fn get_form(&self, id: i64) -> RepoResult<Option<Form>>;
    fn get_shadow(&self, id: i64) -> RepoResult<Option<Shadow>>;
    fn get_commit(&self, id: i64) -> RepoResult<Option<Commit>>;

    /// Inserts form, shadow and commit in order.
    ///
    /// Callers own the surrounding transaction.
    fn insert_full_object(
        &self,
        form: &Form,
        shadow: &Shadow,
        previous_id: Option<i64>,
    ) -> RepoResult<FullObject> {
        let form = self.insert_form(form)?;
        let shadow = self.insert_shadow(&Shadow {
            form_id: form.id,
            ..shadow.clone()
        })?;
        let commit = self.insert_commit(&Commit {
            form_id: form.id,
            shadow_id: shadow.id,
            previous_id,
            ..Commit::default()
        })?;
        Ok(FullObject {
            form,
            shadow,
            commit,
        })
    }

    /// Loads a commit with its form and shadow.
    fn get_full_object(&self, commit_id: i64) -> RepoResult<Option<FullObject>> {
        let Some(commit) = self.get_commit(commit_id)? else {
            return Ok(None);
        };
        let form = self
            .get_form(commit.form_id)?
            .ok_or_else(|| RepoError::InvalidData(format!("commit {commit_id} has no form")))?;
        let shadow = self
            .get_shadow(commit.shadow_id)?
            .ok_or_else(|| RepoError::InvalidData(format!("commit {commit_id} has no shadow")))?;
        Ok(Some(FullObject {
            form,
            shadow,
            commit,
        }))
    }
}

/// SQLite-backed object repository.
pub struct SqliteObjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteObjectRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ObjectRepository for SqliteObjectRepository<'_> {
    fn insert_form(&self, form: &Form) -> RepoResult<Form> {
        if form.id != 0 {
            return Err(RepoError::IdentityConflict("Form"));
        }
        form.validate()?;

        let attributes = encode_document(&form.attributes)?;
        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO forms (kind, attributes) VALUES (?1, ?2) RETURNING {FORM_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params![form.kind.as_str(), attributes])?;
        match rows.next()? {
            Some(row) => parse_form_row(row),
            None => Err(RepoError::InvalidData("form insert returned no row".to_string())),
        }
    }

    fn insert_shadow(&self, shadow: &Shadow) -> RepoResult<Shadow> {
        if shadow.id != 0 {
            return Err(RepoError::IdentityConflict("Shadow"));
        }
        shadow.validate()?;

        let form = self
            .get_form(shadow.form_id)?
            .ok_or_else(|| RepoError::NotFound(format!("form {}", shadow.form_id)))?;
        shadow.validate_against(&form)?;

        let attributes = encode_document(&shadow.attributes)?;
        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO shadows (form_id, attributes) VALUES (?1, ?2) RETURNING {SHADOW_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params![shadow.form_id, attributes])?;
        match rows.next()? {
            Some(row) => parse_shadow_row(row),
            None => Err(RepoError::InvalidData("shadow insert returned no row".to_string())),
        }
    }

    fn insert_commit(&self, commit: &Commit) -> RepoResult<Commit> {
        if commit.id != 0 {
            return Err(RepoError::IdentityConflict("Commit"));
        }
        commit.validate()?;

        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO commits (form_id, shadow_id, previous_id)
             VALUES (?1, ?2, ?3)
             RETURNING {COMMIT_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params![commit.form_id, commit.shadow_id, commit.previous_id])?;
        match rows.next()? {
            Some(row) => parse_commit_row(row),
            None => Err(RepoError::InvalidData("commit insert returned no row".to_string())),
        }
    }

    fn get_form(&self, id: i64) -> RepoResult<Option<Form>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_form_row(row)?));
        }
        Ok(None)
    }

    fn get_shadow(&self, id: i64) -> RepoResult<Option<Shadow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SHADOW_COLUMNS} FROM shadows WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_shadow_row(row)?));
        }
        Ok(None)
    }

    fn get_commit(&self, id: i64) -> RepoResult<Option<Commit>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COMMIT_COLUMNS} FROM commits WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_commit_row(row)?));
        }
        Ok(None)
    }
}

pub(crate) fn encode_document<T: serde::Serialize>(value: &T) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("unable to encode document: {err}")))
}

pub(crate) fn decode_document<T: serde::de::DeserializeOwned>(
    table: &str,
    id: i64,
    raw: &str,
) -> RepoResult<T> {
    serde_json::from_str(raw)
        .map_err(|err| RepoError::InvalidData(format!("{table} {id} has malformed document: {err}")))
}

fn parse_form_row(row: &Row<'_>) -> RepoResult<Form> {
    let id: i64 = row.get(0)?;
    let raw: String = row.get(2)?;
    Ok(Form {
        id,
        kind: row.get(1)?,
        attributes: decode_document("form", id, &raw)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn parse_shadow_row(row: &Row<'_>) -> RepoResult<Shadow> {
    let id: i64 = row.get(0)?;
    let raw: String = row.get(2)?;
    Ok(Shadow {
        id,
        form_id: row.get(1)?,
        attributes: decode_document("shadow", id, &raw)?,
        created_at: row.get(3)?,
    })
}

fn parse_commit_row(row: &Row<'_>) -> RepoResult<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        form_id: row.get(1)?,
        shadow_id: row.get(2)?,
        previous_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}
