use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::GeoPoint;

/// A cached geocoder answer. `point` is `None` for a remembered miss.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedGeocode {
    pub point: Option<GeoPoint>,
    pub cached_at: DateTime<Utc>,
}

/// Look up a cached result no older than `ttl`.
pub fn get_cached_geocode(
    conn: &Connection,
    query_key: &str,
    ttl: Duration,
) -> Result<Option<CachedGeocode>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT latitude, longitude, found, created_at FROM geocode_cache WHERE query_key = ?1",
            params![query_key],
            |row| {
                Ok((
                    row.get::<_, Option<f64>>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((lat, lng, found, created_at)) = row else {
        return Ok(None);
    };

    let Ok(cached_at) = DateTime::parse_from_rfc3339(&created_at) else {
        return Ok(None);
    };
    let cached_at = cached_at.with_timezone(&Utc);
    if Utc::now() - cached_at > ttl {
        return Ok(None);
    }

    let point = match (found, lat, lng) {
        (true, Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
        _ => None,
    };
    Ok(Some(CachedGeocode { point, cached_at }))
}

pub fn put_cached_geocode(
    conn: &Connection,
    query_key: &str,
    query: &str,
    point: Option<GeoPoint>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO geocode_cache (query_key, query, latitude, longitude, found, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(query_key) DO UPDATE SET
             query = excluded.query,
             latitude = excluded.latitude,
             longitude = excluded.longitude,
             found = excluded.found,
             created_at = excluded.created_at",
        params![
            query_key,
            query,
            point.map(|p| p.latitude),
            point.map(|p| p.longitude),
            point.is_some(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}
