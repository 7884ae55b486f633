use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BusinessStatus, CoordinatesSource};
use super::hours::WeeklyHours;

/// A latitude/longitude pair in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

/// A persisted business listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub category: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coordinates_source: Option<CoordinatesSource>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub image_url: Option<String>,
    pub hours: Option<WeeklyHours>,
    pub status: BusinessStatus,
    pub created_at: DateTime<Utc>,
}

/// Insertable listing, as produced by the row validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBusiness {
    pub name: String,
    pub slug: String,
    pub category: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coordinates_source: Option<CoordinatesSource>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub image_url: Option<String>,
    pub hours: Option<WeeklyHours>,
    pub status: BusinessStatus,
}

impl NewBusiness {
    pub fn coordinates(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }

    pub fn set_coordinates(&mut self, point: Option<GeoPoint>, source: Option<CoordinatesSource>) {
        self.latitude = point.map(|p| p.latitude);
        self.longitude = point.map(|p| p.longitude);
        self.coordinates_source = point.and(source);
    }

    /// Folded name + street + city key used to catch duplicates whose slugs differ.
    pub fn identity_key(&self) -> String {
        crate::seed::normalize::identity_key(
            &self.name,
            self.address.as_deref(),
            self.city.as_deref(),
        )
    }

    /// Free-text location for the geocoder: address, city, region, postal code, country.
    pub fn location_query(&self) -> Option<String> {
        let parts: Vec<&str> = [
            self.address.as_deref(),
            self.city.as_deref(),
            self.region.as_deref(),
            self.postal_code.as_deref(),
            self.country.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

        if self.address.is_none() && self.city.is_none() {
            return None;
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

/// Filter for listing businesses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusinessFilter {
    pub category: Option<String>,
    pub city: Option<String>,
    pub status: Option<BusinessStatus>,
    pub limit: Option<u32>,
}

/// Minimal projection of an existing record, used for duplicate detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingBusiness {
    pub slug: String,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
}

impl ExistingBusiness {
    pub fn identity_key(&self) -> String {
        crate::seed::normalize::identity_key(
            &self.name,
            self.address.as_deref(),
            self.city.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_require_both_axes() {
        let mut biz = NewBusiness {
            latitude: Some(40.7),
            ..Default::default()
        };
        assert!(biz.coordinates().is_none());
        biz.longitude = Some(-73.9);
        assert_eq!(biz.coordinates(), Some(GeoPoint::new(40.7, -73.9)));
    }

    #[test]
    fn clearing_coordinates_clears_source() {
        let mut biz = NewBusiness::default();
        biz.set_coordinates(Some(GeoPoint::new(1.0, 2.0)), Some(CoordinatesSource::Geocoded));
        assert_eq!(biz.coordinates_source, Some(CoordinatesSource::Geocoded));
        biz.set_coordinates(None, Some(CoordinatesSource::Geocoded));
        assert!(biz.latitude.is_none());
        assert!(biz.coordinates_source.is_none());
    }

    #[test]
    fn location_query_skips_empty_parts() {
        let biz = NewBusiness {
            address: Some("12 Main St".into()),
            city: Some("Springfield".into()),
            country: Some("US".into()),
            ..Default::default()
        };
        assert_eq!(
            biz.location_query().as_deref(),
            Some("12 Main St, Springfield, US")
        );
    }

    #[test]
    fn location_query_needs_address_or_city() {
        let biz = NewBusiness {
            country: Some("US".into()),
            ..Default::default()
        };
        assert!(biz.location_query().is_none());
    }

    #[test]
    fn geo_point_range_checks() {
        assert!(GeoPoint::new(90.0, 180.0).in_range());
        assert!(!GeoPoint::new(90.1, 0.0).in_range());
        assert!(!GeoPoint::new(0.0, -180.5).in_range());
        assert!(GeoPoint::new(0.0, 0.0).is_null_island());
    }
}
