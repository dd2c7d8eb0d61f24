//! PostgREST-style HTTP backing store.

use crate::query::{Filter, Query};
use crate::store::BackingStore;
use async_trait::async_trait;
use lats_core::{
    ConfigError, LatsError, LatsResult, RawRow, RemoteError, StoreConfig, TransientKind,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Backing store that speaks the PostgREST dialect over HTTPS.
#[derive(Clone)]
pub struct RestBackingStore {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl RestBackingStore {
    pub fn new(config: &StoreConfig) -> LatsResult<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "store.request_timeout_ms",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: build_headers(config)?,
        })
    }

    fn url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    fn request(&self, method: Method, collection: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(collection))
            .headers(self.headers.clone())
    }

    async fn rows_from(&self, collection: &str, response: reqwest::Response) -> LatsResult<Vec<RawRow>> {
        let response = check_status(collection, response).await?;
        response
            .json::<Vec<RawRow>>()
            .await
            .map_err(|e| classify_reqwest(collection, e))
    }
}

#[async_trait]
impl BackingStore for RestBackingStore {
    async fn count(&self, query: &Query) -> LatsResult<u64> {
        let response = self
            .request(Method::HEAD, &query.collection)
            .query(&filter_params(&query.filters))
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(|e| classify_reqwest(&query.collection, e))?;
        let response = check_status(&query.collection, response).await?;

        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        parse_content_range_total(content_range).ok_or_else(|| {
            RemoteError::MalformedRecord {
                collection: query.collection.clone(),
                reason: format!("unusable Content-Range header {content_range:?}"),
            }
            .into()
        })
    }

    async fn select(&self, query: &Query) -> LatsResult<Vec<RawRow>> {
        let mut request = self
            .request(Method::GET, &query.collection)
            .query(&select_params(query));
        if let Some(range) = query.range {
            request = request
                .header("Range-Unit", "items")
                .header("Range", format!("{}-{}", range.from, range.to));
        }
        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest(&query.collection, e))?;
        self.rows_from(&query.collection, response).await
    }

    async fn insert(&self, collection: &str, row: RawRow) -> LatsResult<RawRow> {
        let response = self
            .request(Method::POST, collection)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(|e| classify_reqwest(collection, e))?;
        let rows = self.rows_from(collection, response).await?;
        rows.into_iter().next().ok_or_else(|| {
            RemoteError::MalformedRecord {
                collection: collection.to_string(),
                reason: "insert returned no representation".to_string(),
            }
            .into()
        })
    }

    async fn update(&self, collection: &str, filter: &Filter, patch: RawRow) -> LatsResult<RawRow> {
        let response = self
            .request(Method::PATCH, collection)
            .query(&filter_params(std::slice::from_ref(filter)))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await
            .map_err(|e| classify_reqwest(collection, e))?;
        let rows = self.rows_from(collection, response).await?;
        rows.into_iter().next().ok_or_else(|| {
            RemoteError::NotFound {
                collection: collection.to_string(),
                id: filter.value_text(),
            }
            .into()
        })
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> LatsResult<u64> {
        let response = self
            .request(Method::DELETE, collection)
            .query(&filter_params(std::slice::from_ref(filter)))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|e| classify_reqwest(collection, e))?;
        let rows = self.rows_from(collection, response).await?;
        Ok(rows.len() as u64)
    }
}

fn build_headers(config: &StoreConfig) -> LatsResult<HeaderMap> {
    let invalid_key = |e: reqwest::header::InvalidHeaderValue| ConfigError::InvalidValue {
        field: "store.api_key",
        reason: e.to_string(),
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(&config.api_key).map_err(invalid_key)?,
    );
    headers.insert(
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(invalid_key)?,
    );

    let schema = HeaderValue::from_str(&config.schema).map_err(|e| ConfigError::InvalidValue {
        field: "store.schema",
        reason: e.to_string(),
    })?;
    headers.insert(HeaderName::from_static("accept-profile"), schema.clone());
    headers.insert(HeaderName::from_static("content-profile"), schema);
    Ok(headers)
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("eq.{}", f.value_text())))
        .collect()
}

fn select_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), query.columns.clone())];
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        params.push((
            "order".to_string(),
            format!("{}.{}", order.column, order.direction.as_str()),
        ));
    }
    params
}

/// Total from `0-49/130` or `*/130`. Unknown totals (`*/*`) yield `None`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.parse().ok()
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

async fn check_status(collection: &str, response: reqwest::Response) -> LatsResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<PostgrestError>(&text)
        .ok()
        .and_then(|body| body.message.or(body.details))
        .unwrap_or(text);
    Err(classify_status(collection, status, message))
}

fn classify_status(collection: &str, status: StatusCode, message: String) -> LatsError {
    let collection = collection.to_string();
    match status.as_u16() {
        404 => RemoteError::NotFound {
            collection,
            id: message,
        }
        .into(),
        400 | 409 | 422 => RemoteError::Validation {
            collection,
            reason: message,
        }
        .into(),
        401 | 403 => RemoteError::PermissionDenied {
            collection,
            reason: message,
        }
        .into(),
        408 | 502 | 503 | 504 => LatsError::transient(
            TransientKind::FetchFailed,
            format!("HTTP {}: {}", status.as_u16(), message),
        ),
        other => RemoteError::Rejected {
            status: other,
            message,
        }
        .into(),
    }
}

/// Map a reqwest failure onto the retryable taxonomy. Only decode failures
/// are permanent; everything else happened before a usable response arrived.
fn classify_reqwest(collection: &str, err: reqwest::Error) -> LatsError {
    let kind = if err.is_timeout() {
        TransientKind::Timeout
    } else if err.is_connect() {
        TransientKind::FetchFailed
    } else if err.is_decode() {
        return RemoteError::MalformedRecord {
            collection: collection.to_string(),
            reason: err.to_string(),
        }
        .into();
    } else if err.is_body() {
        TransientKind::Protocol
    } else if err.is_request() {
        TransientKind::ConnectionReset
    } else {
        TransientKind::FetchFailed
    };
    LatsError::transient(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;

    fn config() -> StoreConfig {
        StoreConfig {
            base_url: "https://project.example.co/".to_string(),
            realtime_url: "wss://project.example.co/realtime/v1/websocket".to_string(),
            api_key: "anon-key".to_string(),
            schema: "public".to_string(),
            request_timeout_ms: 30_000,
        }
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let store = RestBackingStore::new(&config()).unwrap();
        assert_eq!(
            store.url("customers"),
            "https://project.example.co/rest/v1/customers"
        );
    }

    #[test]
    fn test_headers_carry_key_and_profile() {
        let headers = build_headers(&config()).unwrap();
        assert_eq!(headers["apikey"], "anon-key");
        assert_eq!(headers["authorization"], "Bearer anon-key");
        assert_eq!(headers["accept-profile"], "public");
    }

    #[test]
    fn test_invalid_api_key_is_config_error() {
        let mut config = config();
        config.api_key = "bad\nkey".to_string();
        let err = build_headers(&config).unwrap_err();
        assert!(matches!(
            err,
            LatsError::Config(ConfigError::InvalidValue { field: "store.api_key", .. })
        ));
    }

    #[test]
    fn test_select_params() {
        let query = Query::table("customers")
            .select("id,name")
            .eq("id", "abc")
            .order("created_at", Direction::Desc)
            .range(0, 49);
        let params = select_params(&query);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "id,name".to_string()),
                ("id".to_string(), "eq.abc".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range_total("0-49/130"), Some(130));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("*/*"), None);
        assert_eq!(parse_content_range_total(""), None);
    }

    #[test]
    fn test_status_classification() {
        let err = classify_status("customers", StatusCode::SERVICE_UNAVAILABLE, "busy".into());
        assert_eq!(err.transient_kind(), Some(TransientKind::FetchFailed));

        let err = classify_status("customers", StatusCode::FORBIDDEN, "rls".into());
        assert!(matches!(err, LatsError::Remote(RemoteError::PermissionDenied { .. })));

        let err = classify_status("customers", StatusCode::UNPROCESSABLE_ENTITY, "bad".into());
        assert!(matches!(err, LatsError::Remote(RemoteError::Validation { .. })));

        let err = classify_status("customers", StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
        assert!(matches!(
            err,
            LatsError::Remote(RemoteError::Rejected { status: 500, .. })
        ));
    }
}
