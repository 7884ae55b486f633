//! PostgREST-backed sink for the hosted business table.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::models::{ExistingBusiness, NewBusiness};

use super::duplicate::DuplicateProbe;
use super::insert::{BusinessSink, SinkError, SinkOutcome};

/// Values per `in.(...)` filter, keeping request URLs well under proxy limits.
const LOOKUP_CHUNK: usize = 50;

#[derive(Debug, Clone)]
pub struct RestSettings {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub timeout_secs: u64,
}

/// Blocking PostgREST client. Create and drop it inside `spawn_blocking`.
pub struct RestSink {
    endpoint: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct InsertedRow {
    slug: String,
}

impl RestSink {
    pub fn new(settings: &RestSettings) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SinkError::Network(e.to_string()))?;

        Ok(Self {
            endpoint: format!(
                "{}/rest/v1/{}",
                settings.base_url.trim_end_matches('/'),
                settings.table
            ),
            api_key: settings.api_key.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authed(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    fn post(&self, batch: &[NewBusiness]) -> Result<PostResult, SinkError> {
        let body: Vec<serde_json::Value> = batch.iter().map(rest_row).collect::<Result<_, _>>()?;
        let response = self
            .authed(self.client.post(&self.endpoint))
            .query(&[("on_conflict", "slug")])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&body)
            .send()
            .map_err(|e| SinkError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            let inserted: Vec<InsertedRow> = response
                .json()
                .map_err(|e| SinkError::Parse(e.to_string()))?;
            return Ok(PostResult::Written(
                inserted.into_iter().map(|r| r.slug).collect(),
            ));
        }

        let body = response.text().unwrap_or_default();
        match classify_status(status) {
            StatusClass::Unauthorized => Err(SinkError::Unauthorized { status }),
            StatusClass::RowLevel => Ok(PostResult::Refused(error_message(&body, status))),
            StatusClass::Fatal => Err(SinkError::Http { status, body }),
        }
    }

    fn lookup(&self, column: &str, values: &[String]) -> Result<Vec<ExistingBusiness>, SinkError> {
        let mut found = Vec::new();
        for chunk in values.chunks(LOOKUP_CHUNK) {
            let response = self
                .authed(self.client.get(&self.endpoint))
                .query(&[
                    ("select", "slug,name,address,city"),
                    (column, postgrest_in_list(chunk).as_str()),
                ])
                .send()
                .map_err(|e| SinkError::Network(e.to_string()))?;

            let status = response.status().as_u16();
            if !response.status().is_success() {
                if classify_status(status) == StatusClass::Unauthorized {
                    return Err(SinkError::Unauthorized { status });
                }
                let body = response.text().unwrap_or_default();
                return Err(SinkError::Http { status, body });
            }
            let rows: Vec<ExistingBusiness> = response
                .json()
                .map_err(|e| SinkError::Parse(e.to_string()))?;
            found.extend(rows);
        }
        Ok(found)
    }
}

enum PostResult {
    /// Slugs the server actually inserted.
    Written(HashSet<String>),
    /// The request was refused for its content.
    Refused(String),
}

#[derive(Debug, PartialEq, Eq)]
enum StatusClass {
    Unauthorized,
    RowLevel,
    Fatal,
}

fn classify_status(status: u16) -> StatusClass {
    match status {
        401 | 403 => StatusClass::Unauthorized,
        400..=499 if status != 408 && status != 429 => StatusClass::RowLevel,
        _ => StatusClass::Fatal,
    }
}

/// PostgREST error bodies carry a `message`; fall back to the raw text.
fn error_message(body: &str, status: u16) -> String {
    #[derive(Deserialize)]
    struct PostgrestError {
        message: String,
    }
    match serde_json::from_str::<PostgrestError>(body) {
        Ok(err) => err.message,
        Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => body.trim().to_string(),
    }
}

/// `in.("a","b")` with values double-quoted and `"`/`\` escaped.
pub fn postgrest_in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// JSON row for the hosted table: the listing plus its identity key.
fn rest_row(business: &NewBusiness) -> Result<serde_json::Value, SinkError> {
    let mut value =
        serde_json::to_value(business).map_err(|e| SinkError::Parse(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "identity_key".into(),
            serde_json::Value::String(business.identity_key()),
        );
    }
    Ok(value)
}

fn outcomes_for(batch: &[NewBusiness], inserted: &HashSet<String>) -> Vec<SinkOutcome> {
    batch
        .iter()
        .map(|b| {
            if inserted.contains(&b.slug) {
                SinkOutcome::Inserted
            } else {
                SinkOutcome::SkippedDuplicate
            }
        })
        .collect()
}

impl BusinessSink for RestSink {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn find_existing(&self, probes: &[DuplicateProbe]) -> Result<Vec<ExistingBusiness>, SinkError> {
        let slugs: Vec<String> = probes.iter().map(|p| p.slug.clone()).collect();
        let mut names: Vec<String> = probes.iter().map(|p| p.name.clone()).collect();
        names.sort();
        names.dedup();

        let mut found = self.lookup("slug", &slugs)?;
        for record in self.lookup("name", &names)? {
            if !found.iter().any(|f| f.slug == record.slug) {
                found.push(record);
            }
        }
        Ok(found)
    }

    fn insert_batch(&self, batch: &[NewBusiness]) -> Result<Vec<SinkOutcome>, SinkError> {
        match self.post(batch)? {
            PostResult::Written(inserted) => Ok(outcomes_for(batch, &inserted)),
            PostResult::Refused(message) if batch.len() == 1 => {
                Ok(vec![SinkOutcome::Rejected(message)])
            }
            PostResult::Refused(message) => {
                tracing::warn!(
                    error = %message,
                    batch_size = batch.len(),
                    "REST batch refused; posting rows one at a time"
                );
                let mut outcomes = Vec::with_capacity(batch.len());
                for business in batch {
                    let single = std::slice::from_ref(business);
                    let posted = match self.post(single) {
                        Ok(posted) => posted,
                        Err(source) if outcomes.is_empty() => return Err(source),
                        Err(source) => {
                            return Err(SinkError::Partial {
                                outcomes,
                                source: Box::new(source),
                            })
                        }
                    };
                    outcomes.push(match posted {
                        PostResult::Written(inserted) => outcomes_for(single, &inserted)
                            .pop()
                            .unwrap_or(SinkOutcome::SkippedDuplicate),
                        PostResult::Refused(reason) => SinkOutcome::Rejected(reason),
                    });
                }
                Ok(outcomes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;
    use crate::models::{CoordinatesSource, GeoPoint};

    fn settings() -> RestSettings {
        RestSettings {
            base_url: "https://project.example.co/".into(),
            api_key: "anon-key".into(),
            table: "businesses".into(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn endpoint_built_from_base_and_table() {
        let sink = RestSink::new(&settings()).unwrap();
        assert_eq!(sink.endpoint(), "https://project.example.co/rest/v1/businesses");
        assert_eq!(sink.name(), "rest");
    }

    #[test]
    fn in_list_quotes_and_escapes() {
        let values = vec![
            "joes-pizza".to_string(),
            "Smith, Jones & Co".to_string(),
            "say \"hi\"".to_string(),
        ];
        assert_eq!(
            postgrest_in_list(&values),
            r#"in.("joes-pizza","Smith, Jones & Co","say \"hi\"")"#
        );
    }

    #[test]
    fn status_classes() {
        assert_eq!(classify_status(401), StatusClass::Unauthorized);
        assert_eq!(classify_status(403), StatusClass::Unauthorized);
        assert_eq!(classify_status(400), StatusClass::RowLevel);
        assert_eq!(classify_status(409), StatusClass::RowLevel);
        assert_eq!(classify_status(429), StatusClass::Fatal);
        assert_eq!(classify_status(500), StatusClass::Fatal);
    }

    #[test]
    fn error_message_prefers_postgrest_message() {
        let body = r#"{"code":"23503","message":"insert violates foreign key","details":null}"#;
        assert_eq!(error_message(body, 409), "insert violates foreign key");
        assert_eq!(error_message("", 400), "HTTP 400");
        assert_eq!(error_message("bad things", 400), "bad things");
    }

    #[test]
    fn rest_row_carries_identity_key_and_enums() {
        let mut business = NewBusiness {
            name: "Joe's Pizza".into(),
            slug: "joes-pizza".into(),
            category: "restaurants".into(),
            city: Some("Springfield".into()),
            ..Default::default()
        };
        business.set_coordinates(Some(GeoPoint::new(1.5, 2.5)), Some(CoordinatesSource::Geocoded));

        let row = rest_row(&business).unwrap();
        assert_eq!(row["identity_key"], "joes pizza||springfield");
        assert_eq!(row["status"], "active");
        assert_eq!(row["coordinates_source"], "geocoded");
        assert_eq!(row["latitude"], 1.5);
    }

    #[test]
    fn returned_slugs_mark_inserted_rest_skipped() {
        let batch = vec![
            NewBusiness {
                slug: "a".into(),
                ..Default::default()
            },
            NewBusiness {
                slug: "b".into(),
                ..Default::default()
            },
        ];
        let inserted: HashSet<String> = ["b".to_string()].into_iter().collect();
        assert_eq!(
            outcomes_for(&batch, &inserted),
            vec![SinkOutcome::SkippedDuplicate, SinkOutcome::Inserted]
        );
    }

    // ═══════════════════════════════════════════════════════════
    // Against a local PostgREST stand-in
    // ═══════════════════════════════════════════════════════════

    #[derive(Default)]
    struct Recorded {
        posts: Vec<RecordedPost>,
        lookups: Vec<HashMap<String, String>>,
    }

    struct RecordedPost {
        query: HashMap<String, String>,
        headers: HeaderMap,
        slugs: Vec<String>,
        body: Vec<serde_json::Value>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    /// Refuses any batch holding "bad" or "boom"; singles of those fail with
    /// 400 and 500. Slug "taken" is silently ignored as already stored.
    async fn post_rows(
        State(recorded): State<Shared>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Vec<serde_json::Value>>,
    ) -> Response {
        let slugs: Vec<String> = body
            .iter()
            .filter_map(|row| row["slug"].as_str().map(String::from))
            .collect();
        recorded.lock().unwrap().posts.push(RecordedPost {
            query,
            headers,
            slugs: slugs.clone(),
            body,
        });

        let troubled = slugs.iter().any(|s| s == "bad" || s == "boom");
        if slugs.len() > 1 && troubled {
            let refusal = serde_json::json!({ "message": "batch refused" });
            return (StatusCode::BAD_REQUEST, Json(refusal)).into_response();
        }
        match slugs.first().map(String::as_str) {
            Some("bad") if slugs.len() == 1 => {
                let refusal = serde_json::json!({ "message": "violates check constraint" });
                (StatusCode::BAD_REQUEST, Json(refusal)).into_response()
            }
            Some("boom") if slugs.len() == 1 => {
                (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
            }
            _ => {
                let written: Vec<serde_json::Value> = slugs
                    .iter()
                    .filter(|s| s.as_str() != "taken")
                    .map(|s| serde_json::json!({ "slug": s }))
                    .collect();
                (StatusCode::CREATED, Json(written)).into_response()
            }
        }
    }

    async fn lookup_rows(
        State(recorded): State<Shared>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Vec<serde_json::Value>> {
        let by_slug = query.contains_key("slug");
        recorded.lock().unwrap().lookups.push(query);
        let stored = serde_json::json!({
            "slug": "joes-pizza",
            "name": "Joe's Pizza",
            "address": "12 Main St",
            "city": "Springfield",
        });
        if by_slug {
            Json(vec![stored])
        } else {
            let namesake = serde_json::json!({
                "slug": "joes-pizza-2",
                "name": "Joe's Pizza",
                "address": null,
                "city": "Shelbyville",
            });
            Json(vec![stored, namesake])
        }
    }

    async fn locked_out() -> StatusCode {
        StatusCode::FORBIDDEN
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn postgrest() -> (String, Shared) {
        let recorded = Shared::default();
        let app = Router::new()
            .route("/rest/v1/businesses", get(lookup_rows).post(post_rows))
            .with_state(recorded.clone());
        (spawn_server(app).await, recorded)
    }

    fn local_settings(base_url: String) -> RestSettings {
        RestSettings {
            base_url,
            api_key: "anon-key".into(),
            table: "businesses".into(),
            timeout_secs: 5,
        }
    }

    fn listing(slug: &str) -> NewBusiness {
        NewBusiness {
            name: format!("Biz {slug}"),
            slug: slug.into(),
            category: "cafes".into(),
            city: Some("Springfield".into()),
            ..Default::default()
        }
    }

    /// The blocking client must run off the async runtime.
    async fn insert_remote(base_url: String, slugs: &[&str]) -> Result<Vec<SinkOutcome>, SinkError> {
        let batch: Vec<NewBusiness> = slugs.iter().map(|s| listing(s)).collect();
        tokio::task::spawn_blocking(move || {
            let sink = RestSink::new(&local_settings(base_url))?;
            sink.insert_batch(&batch)
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_post_upserts_on_slug_and_ignores_duplicates() {
        let (base_url, recorded) = postgrest().await;
        let outcomes = insert_remote(base_url, &["a", "taken", "c"]).await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                SinkOutcome::Inserted,
                SinkOutcome::SkippedDuplicate,
                SinkOutcome::Inserted
            ]
        );

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.posts.len(), 1);
        let post = &recorded.posts[0];
        assert_eq!(post.query.get("on_conflict").map(String::as_str), Some("slug"));
        assert_eq!(
            post.headers.get("Prefer").unwrap(),
            "resolution=ignore-duplicates,return=representation"
        );
        assert_eq!(post.headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(post.headers.get("Authorization").unwrap(), "Bearer anon-key");
        assert_eq!(post.body[0]["identity_key"], "biz a||springfield");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_batch_falls_back_to_single_rows() {
        let (base_url, recorded) = postgrest().await;
        let outcomes = insert_remote(base_url, &["a", "bad", "c"]).await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                SinkOutcome::Inserted,
                SinkOutcome::Rejected("violates check constraint".into()),
                SinkOutcome::Inserted
            ]
        );

        let recorded = recorded.lock().unwrap();
        let sizes: Vec<usize> = recorded.posts.iter().map(|p| p.slugs.len()).collect();
        assert_eq!(sizes, vec![3, 1, 1, 1]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_mid_fallback_keeps_written_rows() {
        let (base_url, recorded) = postgrest().await;
        let err = insert_remote(base_url, &["a", "boom", "c"]).await.unwrap_err();
        match err {
            SinkError::Partial { outcomes, source } => {
                assert_eq!(outcomes, vec![SinkOutcome::Inserted]);
                assert!(matches!(*source, SinkError::Http { status: 500, ref body } if body == "boom"));
            }
            other => panic!("expected a partial failure, got {other:?}"),
        }
        assert_eq!(recorded.lock().unwrap().posts.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_single_failure_is_not_partial() {
        let (base_url, _recorded) = postgrest().await;
        let err = insert_remote(base_url, &["boom", "a"]).await.unwrap_err();
        assert!(matches!(err, SinkError::Http { status: 500, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn find_existing_uses_in_filters_and_merges() {
        let (base_url, recorded) = postgrest().await;
        let candidates = vec![
            DuplicateProbe {
                slug: "joes-pizza".into(),
                name: "Joe's Pizza".into(),
                identity_key: "joes pizza|12 main st|springfield".into(),
            },
            DuplicateProbe {
                slug: "joes-pizza-downtown".into(),
                name: "Joe's Pizza".into(),
                identity_key: "joes pizza||springfield".into(),
            },
        ];
        let found = tokio::task::spawn_blocking(move || {
            RestSink::new(&local_settings(base_url))?.find_existing(&candidates)
        })
        .await
        .unwrap()
        .unwrap();

        let slugs: Vec<&str> = found.iter().map(|f| f.slug.as_str()).collect();
        assert_eq!(slugs, vec!["joes-pizza", "joes-pizza-2"]);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.lookups.len(), 2);
        assert_eq!(
            recorded.lookups[0].get("slug").map(String::as_str),
            Some(r#"in.("joes-pizza","joes-pizza-downtown")"#)
        );
        assert_eq!(
            recorded.lookups[1].get("name").map(String::as_str),
            Some(r#"in.("Joe's Pizza")"#)
        );
        assert_eq!(
            recorded.lookups[0].get("select").map(String::as_str),
            Some("slug,name,address,city")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn forbidden_is_unauthorized() {
        let app = Router::new().route("/rest/v1/businesses", get(locked_out).post(locked_out));
        let base_url = spawn_server(app).await;

        let insert_url = base_url.clone();
        let err = insert_remote(insert_url, &["a"]).await.unwrap_err();
        assert!(matches!(err, SinkError::Unauthorized { status: 403 }));

        let candidates = vec![DuplicateProbe {
            slug: "a".into(),
            name: "Biz a".into(),
            identity_key: "biz a||springfield".into(),
        }];
        let err = tokio::task::spawn_blocking(move || {
            RestSink::new(&local_settings(base_url))?.find_existing(&candidates)
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, SinkError::Unauthorized { status: 403 }));
    }

}
