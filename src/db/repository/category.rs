use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::Category;

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT slug, name FROM categories ORDER BY slug")?;
    let rows = stmt.query_map([], |row| {
        Ok(Category {
            slug: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn insert_category(conn: &Connection, category: &Category) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO categories (slug, name) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
        params![category.slug, category.name],
    )?;
    if changed == 0 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "category '{}' already exists",
            category.slug
        )));
    }
    Ok(())
}
