//! Upstream artifact lookup.
//!
//! The coordinator only needs a key-to-URL resolution; [`UpstreamResolver`]
//! is the seam. [`HttpResolver`] is the production implementation: it issues
//! `GET {base_url}{lookup_path}?{query_param}={key}` and extracts the URL from
//! the JSON response with a JSON pointer.

use async_trait::async_trait;
use easel_core::config::UpstreamConfig;
use reqwest::StatusCode;
use thiserror::Error;

/// Failure to resolve a key. Its message becomes the row's failure reason.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("key must not be blank")]
    BlankKey,

    #[error("no artifact found for '{0}'")]
    NotFound(String),

    #[error("upstream returned HTTP {status} for '{key}'")]
    Status { key: String, status: u16 },

    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream response for '{key}' has no URL at '{pointer}'")]
    MissingUrl { key: String, pointer: String },

    #[error("invalid upstream configuration: {0}")]
    Config(String),
}

/// Resolves an artifact key to its current URL.
#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    async fn resolve(&self, key: &str) -> Result<String, UpstreamError>;
}

/// HTTP JSON lookup resolver.
pub struct HttpResolver {
    client: reqwest::Client,
    lookup_url: String,
    query_param: String,
    url_pointer: String,
}

impl HttpResolver {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        config.validate().map_err(UpstreamError::Config)?;

        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("easel/{}", env!("CARGO_PKG_VERSION")));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            lookup_url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.lookup_path
            ),
            query_param: config.query_param.clone(),
            url_pointer: config.url_pointer.clone(),
        })
    }
}

#[async_trait]
impl UpstreamResolver for HttpResolver {
    async fn resolve(&self, key: &str) -> Result<String, UpstreamError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(UpstreamError::BlankKey);
        }

        let response = self
            .client
            .get(&self.lookup_url)
            .query(&[(self.query_param.as_str(), key)])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(UpstreamError::NotFound(key.to_string())),
            status => {
                return Err(UpstreamError::Status {
                    key: key.to_string(),
                    status: status.as_u16(),
                });
            }
        }

        let body: serde_json::Value = response.json().await?;
        body.pointer(&self.url_pointer)
            .and_then(serde_json::Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or_else(|| UpstreamError::MissingUrl {
                key: key.to_string(),
                pointer: self.url_pointer.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn lookup(Query(params): Query<HashMap<String, String>>) -> axum::response::Response {
        match params.get("exact").map(String::as_str) {
            Some("Lightning Bolt") => Json(serde_json::json!({
                "name": "Lightning Bolt",
                "image_uris": { "normal": "https://img.example/bolt.jpg" }
            }))
            .into_response(),
            Some("Faceless") => Json(serde_json::json!({ "name": "Faceless" })).into_response(),
            Some("Teapot") => AxumStatus::IM_A_TEAPOT.into_response(),
            _ => AxumStatus::NOT_FOUND.into_response(),
        }
    }

    async fn spawn_upstream() -> UpstreamConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/cards/named", get(lookup));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        UpstreamConfig {
            base_url: format!("http://{addr}"),
            ..UpstreamConfig::default()
        }
    }

    #[tokio::test]
    async fn resolves_url_through_json_pointer() {
        let resolver = HttpResolver::new(&spawn_upstream().await).unwrap();
        let url = resolver.resolve("  Lightning Bolt ").await.unwrap();
        assert_eq!(url, "https://img.example/bolt.jpg");
    }

    #[tokio::test]
    async fn reports_descriptive_failures() {
        let resolver = HttpResolver::new(&spawn_upstream().await).unwrap();

        let err = resolver.resolve("Nonexistent").await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotFound(ref k) if k == "Nonexistent"));

        let err = resolver.resolve("Faceless").await.unwrap_err();
        assert!(err.to_string().contains("/image_uris/normal"));

        let err = resolver.resolve("Teapot").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 418, .. }));
    }

    #[tokio::test]
    async fn blank_key_is_rejected_without_a_request() {
        let config = UpstreamConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..UpstreamConfig::default()
        };
        let resolver = HttpResolver::new(&config).unwrap();
        assert!(matches!(
            resolver.resolve("   ").await,
            Err(UpstreamError::BlankKey)
        ));
    }
}
