use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

/// SQLite caps bound parameters per statement; stay well below the 999 floor.
const MAX_IN_PARAMS: usize = 400;

const BUSINESS_COLUMNS: &str = "id, name, slug, category, description, address, city, region,
     postal_code, country, latitude, longitude, coordinates_source, phone, email, website,
     image_url, hours, status, created_at";

/// Insert a listing unless its slug already exists.
///
/// Returns the new id, or `None` when the slug was taken (the row is left untouched).
pub fn insert_business(conn: &Connection, biz: &NewBusiness) -> Result<Option<Uuid>, DatabaseError> {
    let id = Uuid::new_v4();
    let hours = biz.hours.as_ref().map(serde_json::to_string).transpose()?;

    let changed = conn.execute(
        "INSERT INTO businesses (id, name, slug, identity_key, category, description, address,
             city, region, postal_code, country, latitude, longitude, coordinates_source, phone,
             email, website, image_url, hours, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
             ?18, ?19, ?20, ?21)
         ON CONFLICT(slug) DO NOTHING",
        params![
            id.to_string(),
            biz.name,
            biz.slug,
            biz.identity_key(),
            biz.category,
            biz.description,
            biz.address,
            biz.city,
            biz.region,
            biz.postal_code,
            biz.country,
            biz.latitude,
            biz.longitude,
            biz.coordinates_source.map(|s| s.as_str()),
            biz.phone,
            biz.email,
            biz.website,
            biz.image_url,
            hours,
            biz.status.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )?;

    Ok((changed > 0).then_some(id))
}

pub fn get_business_by_slug(conn: &Connection, slug: &str) -> Result<Option<Business>, DatabaseError> {
    let sql = format!("SELECT {BUSINESS_COLUMNS} FROM businesses WHERE slug = ?1");
    let found = conn.query_row(&sql, params![slug], business_from_row).optional()?;
    Ok(found)
}

pub fn list_businesses(conn: &Connection, filter: &BusinessFilter) -> Result<Vec<Business>, DatabaseError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(category) = &filter.category {
        clauses.push("category = ?");
        values.push(Value::Text(category.clone()));
    }
    if let Some(city) = &filter.city {
        clauses.push("city = ? COLLATE NOCASE");
        values.push(Value::Text(city.clone()));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }

    let mut sql = format!("SELECT {BUSINESS_COLUMNS} FROM businesses");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY name COLLATE NOCASE, slug LIMIT ?");
    values.push(Value::Integer(i64::from(filter.limit.unwrap_or(100))));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), business_from_row)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn count_businesses(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM businesses", [], |row| row.get(0))?;
    Ok(count)
}

/// Existing records whose slug or identity key matches any of the given ones.
pub fn find_existing_businesses(
    conn: &Connection,
    slugs: &[String],
    identity_keys: &[String],
) -> Result<Vec<ExistingBusiness>, DatabaseError> {
    let mut found: Vec<ExistingBusiness> = Vec::new();

    for (column, keys) in [("slug", slugs), ("identity_key", identity_keys)] {
        for chunk in keys.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT slug, name, address, city FROM businesses WHERE {column} IN ({})",
                repeat_vars(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(ExistingBusiness {
                    slug: row.get(0)?,
                    name: row.get(1)?,
                    address: row.get(2)?,
                    city: row.get(3)?,
                })
            })?;
            for row in rows {
                let row = row?;
                if !found.iter().any(|f| f.slug == row.slug) {
                    found.push(row);
                }
            }
        }
    }

    Ok(found)
}

fn repeat_vars(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn business_from_row(row: &Row<'_>) -> rusqlite::Result<Business> {
    let status: String = row.get(18)?;
    let hours: Option<String> = row.get(17)?;
    let created_at: String = row.get(19)?;

    Ok(Business {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        name: row.get(1)?,
        slug: row.get(2)?,
        category: row.get(3)?,
        description: row.get(4)?,
        address: row.get(5)?,
        city: row.get(6)?,
        region: row.get(7)?,
        postal_code: row.get(8)?,
        country: row.get(9)?,
        latitude: row.get(10)?,
        longitude: row.get(11)?,
        coordinates_source: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| CoordinatesSource::from_str(&s).ok()),
        phone: row.get(13)?,
        email: row.get(14)?,
        website: row.get(15)?,
        image_url: row.get(16)?,
        hours: hours.and_then(|h| serde_json::from_str(&h).ok()),
        status: BusinessStatus::from_str(&status)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(18, Type::Text, Box::new(e)))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(19, Type::Text, Box::new(e)))?,
    })
}
