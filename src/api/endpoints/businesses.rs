//! Public read endpoints over the local store.

use std::str::FromStr;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::db::repository::{list_businesses, list_categories};
use crate::models::{Business, BusinessFilter, BusinessStatus, Category};

const MAX_LIMIT: u32 = 500;

#[derive(Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
    pub city: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl ListQuery {
    fn into_filter(self) -> Result<BusinessFilter, ApiError> {
        let status = match self.status.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(BusinessStatus::from_str(raw).map_err(|_| {
                ApiError::BadRequest(format!(
                    "status must be one of: {}",
                    BusinessStatus::values().join(", ")
                ))
            })?),
        };
        Ok(BusinessFilter {
            category: self.category.filter(|c| !c.is_empty()),
            city: self.city.filter(|c| !c.is_empty()),
            status,
            limit: Some(self.limit.unwrap_or(100).clamp(1, MAX_LIMIT)),
        })
    }
}

#[derive(Serialize)]
pub struct BusinessList {
    pub count: usize,
    pub businesses: Vec<Business>,
}

/// `GET /api/businesses?category=&city=&status=&limit=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<BusinessList>, ApiError> {
    let filter = query.into_filter()?;
    let businesses = tokio::task::spawn_blocking(move || -> Result<Vec<Business>, ApiError> {
        let conn = ctx.core.open_db()?;
        Ok(list_businesses(&conn, &filter)?)
    })
    .await??;

    Ok(Json(BusinessList {
        count: businesses.len(),
        businesses,
    }))
}

/// `GET /api/categories`
pub async fn categories(State(ctx): State<ApiContext>) -> Result<Json<Vec<Category>>, ApiError> {
    let categories = tokio::task::spawn_blocking(move || -> Result<Vec<Category>, ApiError> {
        let conn = ctx.core.open_db()?;
        Ok(list_categories(&conn)?)
    })
    .await??;
    Ok(Json(categories))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(status: Option<&str>, limit: Option<u32>) -> ListQuery {
        ListQuery {
            category: Some(String::new()),
            city: Some("Springfield".into()),
            status: status.map(String::from),
            limit,
        }
    }

    #[test]
    fn filter_parses_status_and_clamps_limit() {
        let filter = query(Some("closed"), Some(10_000)).into_filter().unwrap();
        assert_eq!(filter.status, Some(BusinessStatus::Closed));
        assert_eq!(filter.limit, Some(MAX_LIMIT));
        assert!(filter.category.is_none());
        assert_eq!(filter.city.as_deref(), Some("Springfield"));
    }

    #[test]
    fn unknown_status_is_bad_request() {
        let err = query(Some("haunted"), None).into_filter().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
