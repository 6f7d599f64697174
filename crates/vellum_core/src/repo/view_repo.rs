//! View persistence.

use crate::model::entity::View;
use crate::repo::object_repo::{decode_document, encode_document, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const VIEW_SELECT_SQL: &str = "SELECT id, name, attributes, created_at, updated_at FROM views";

/// Id of the view seeded by the schema migrations.
pub const DEFAULT_VIEW_ID: i64 = 1;

/// Repository interface for view namespaces.
pub trait ViewRepository {
    fn create_view(&self, view: &View) -> RepoResult<View>;
    fn get_view(&self, id: i64) -> RepoResult<Option<View>>;
    /// All views ordered by id.
    fn list_views(&self) -> RepoResult<Vec<View>>;
}

/// SQLite-backed view repository.
pub struct SqliteViewRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteViewRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ViewRepository for SqliteViewRepository<'_> {
    fn create_view(&self, view: &View) -> RepoResult<View> {
        if view.id != 0 {
            return Err(RepoError::IdentityConflict("View"));
        }
        view.validate()?;

        let attributes = encode_document(&view.attributes)?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO views (name, attributes)
             VALUES (?1, ?2)
             RETURNING id, name, attributes, created_at, updated_at;",
        )?;
        let mut rows = stmt.query(params![view.name.as_str(), attributes])?;
        match rows.next()? {
            Some(row) => parse_view_row(row),
            None => Err(RepoError::InvalidData("view insert returned no row".to_string())),
        }
    }

    fn get_view(&self, id: i64) -> RepoResult<Option<View>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{VIEW_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_view_row(row)?));
        }
        Ok(None)
    }

    fn list_views(&self) -> RepoResult<Vec<View>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{VIEW_SELECT_SQL} ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;

        let mut views = Vec::new();
        while let Some(row) = rows.next()? {
            views.push(parse_view_row(row)?);
        }
        Ok(views)
    }
}

fn parse_view_row(row: &Row<'_>) -> RepoResult<View> {
    let id: i64 = row.get(0)?;
    let raw: String = row.get(2)?;
    Ok(View {
        id,
        name: row.get(1)?,
        attributes: decode_document("view", id, &raw)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
