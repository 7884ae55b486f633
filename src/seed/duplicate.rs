//! Duplicate detection against stored records and earlier rows of the same file.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::ExistingBusiness;

use super::types::{DuplicateOf, DuplicateReason, IssueCode, RowIssue, RowStatus, ValidatedRow};

/// What the sink is asked to look up for one candidate row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateProbe {
    pub slug: String,
    pub name: String,
    pub identity_key: String,
}

/// Probes for every row that produced a listing and is not blocked.
pub fn probes(rows: &[ValidatedRow]) -> Vec<DuplicateProbe> {
    rows.iter()
        .filter(|r| r.status != RowStatus::Error)
        .filter_map(|r| r.business.as_ref())
        .map(|b| DuplicateProbe {
            slug: b.slug.clone(),
            name: b.name.clone(),
            identity_key: b.identity_key(),
        })
        .collect()
}

/// Stored records keyed by slug and by identity key.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    by_slug: HashMap<String, String>,
    by_identity: HashMap<String, String>,
}

impl DuplicateIndex {
    pub fn new(existing: Vec<ExistingBusiness>) -> Self {
        let mut index = Self::default();
        for record in existing {
            index
                .by_identity
                .entry(record.identity_key())
                .or_insert_with(|| record.slug.clone());
            index.by_slug.insert(record.slug.clone(), record.slug);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }
}

/// Flag rows that repeat a stored record or an earlier row. Returns the duplicate count.
///
/// Stored matches win over in-file ones; slug matches win over identity matches.
pub fn mark_duplicates(rows: &mut [ValidatedRow], index: &DuplicateIndex) -> usize {
    let mut seen_slug: HashMap<String, usize> = HashMap::new();
    let mut seen_identity: HashMap<String, usize> = HashMap::new();
    let mut marked = 0;

    for row in rows.iter_mut() {
        if row.status == RowStatus::Error {
            continue;
        }
        let Some(business) = row.business.as_ref() else {
            continue;
        };
        let slug = business.slug.clone();
        let identity = business.identity_key();

        let duplicate = if index.by_slug.contains_key(&slug) {
            Some(DuplicateOf {
                reason: DuplicateReason::ExistingSlug,
                existing_slug: Some(slug.clone()),
                row_index: None,
            })
        } else if let Some(existing) = index.by_identity.get(&identity) {
            Some(DuplicateOf {
                reason: DuplicateReason::ExistingIdentity,
                existing_slug: Some(existing.clone()),
                row_index: None,
            })
        } else {
            seen_slug
                .get(&slug)
                .or_else(|| seen_identity.get(&identity))
                .map(|&earlier| DuplicateOf {
                    reason: DuplicateReason::InFile,
                    existing_slug: None,
                    row_index: Some(earlier),
                })
        };

        match duplicate {
            Some(dup) => {
                let message = match (&dup.reason, &dup.existing_slug, dup.row_index) {
                    (DuplicateReason::InFile, _, Some(earlier)) => {
                        format!("same listing as row {earlier}")
                    }
                    (DuplicateReason::ExistingSlug, _, _) => {
                        format!("slug '{slug}' already exists")
                    }
                    (_, Some(existing), _) => {
                        format!("matches existing listing '{existing}'")
                    }
                    _ => "duplicate listing".to_string(),
                };
                row.push(RowIssue::warning("slug", IssueCode::Duplicate, message));
                row.duplicate_of = Some(dup);
                marked += 1;
            }
            None => {
                seen_slug.entry(slug).or_insert(row.index);
                seen_identity.entry(identity).or_insert(row.index);
            }
        }
    }

    if marked > 0 {
        tracing::debug!(duplicates = marked, "Duplicate rows flagged");
    }
    marked
}
