//! Blocking HTTP source of raw listing records, one search page per request.
//!
//! - `ureq` agent, no async.
//! - The request body is a JSON template with
//!   `searchQueryState.pagination.currentPage` set per page.
//! - Results come back tagged: records, end of data, or a failure with its
//!   reason, so callers can retry failures instead of mistaking them for the end.

use std::path::Path;
use std::time::Duration;

use http::StatusCode;
use log::debug;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::Config;
use crate::models::search::{RawRecord, SearchResponse};

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";
const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}")]
    Http { status: StatusCode },
    #[error("unexpected response shape at `{path}`: {message}")]
    Decode { path: String, message: String },
    #[error("request payload error: {0}")]
    Payload(String),
}

impl SourceError {
    /// Payload problems are local configuration errors; retrying cannot fix them.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Payload(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Records {
        records: Vec<RawRecord>,
        /// Page count reported by the source, when it reports one.
        total_pages: Option<u32>,
    },
    /// The source answered successfully with no records.
    Exhausted,
}

pub trait RecordSource {
    /// Fetch the 1-indexed `page`.
    fn fetch(&self, page: u32) -> Result<Page, SourceError>;
}

pub struct SearchClient {
    agent: ureq::Agent,
    url: String,
    template: Value,
}

impl SearchClient {
    pub fn new(url: impl Into<String>, template: Value, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        SearchClient {
            agent,
            url: url.into(),
            template,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, SourceError> {
        let template = load_template(&cfg.search_payload_file)?;
        Ok(Self::new(cfg.source_url.clone(), template, cfg.request_timeout))
    }
}

impl RecordSource for SearchClient {
    fn fetch(&self, page: u32) -> Result<Page, SourceError> {
        let body = page_body(&self.template, page)?;
        let result = self
            .agent
            .put(&self.url)
            .header("Accept", "*/*")
            .header("User-Agent", USER_AGENT)
            .send_json(&body);

        match result {
            Ok(mut resp) => {
                let text = resp
                    .body_mut()
                    .with_config()
                    .limit(MAX_BODY_BYTES)
                    .read_to_string()
                    .map_err(|e| SourceError::Transport(e.to_string()))?;
                debug!("Page {} response: {} bytes", page, text.len());
                decode_page(&text)
            }
            Err(ureq::Error::StatusCode(code)) => Err(SourceError::Http {
                status: StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY),
            }),
            Err(e) => Err(SourceError::Transport(e.to_string())),
        }
    }
}

fn load_template(path: &Path) -> Result<Value, SourceError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SourceError::Payload(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| SourceError::Payload(format!("{}: {}", path.display(), e)))
}

/// Template with the requested page number set; missing intermediate objects are created.
fn page_body(template: &Value, page: u32) -> Result<Value, SourceError> {
    let not_object = |what: &str| SourceError::Payload(format!("{} must be a JSON object", what));

    let mut body = template.clone();
    let state = body
        .as_object_mut()
        .ok_or_else(|| not_object("payload"))?
        .entry("searchQueryState")
        .or_insert_with(|| json!({}));
    let pagination = state
        .as_object_mut()
        .ok_or_else(|| not_object("searchQueryState"))?
        .entry("pagination")
        .or_insert_with(|| json!({}));
    pagination
        .as_object_mut()
        .ok_or_else(|| not_object("searchQueryState.pagination"))?
        .insert("currentPage".to_string(), json!(page));
    Ok(body)
}

fn decode_page(text: &str) -> Result<Page, SourceError> {
    let de = &mut serde_json::Deserializer::from_str(text);
    let resp: SearchResponse = serde_path_to_error::deserialize(de).map_err(|e| SourceError::Decode {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })?;

    if let Some(count) = resp.total_result_count() {
        debug!("Source reports {} result(s) in total", count);
    }
    let total_pages = resp.total_pages();
    let records = resp.into_records();
    if records.is_empty() {
        Ok(Page::Exhausted)
    } else {
        Ok(Page::Records { records, total_pages })
    }
}
