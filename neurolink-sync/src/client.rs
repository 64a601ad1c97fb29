//! Authenticated HTTP client for the remote document store.
//!
//! Provides:
//! - `DocumentPath`: validated, segment-based document addressing
//! - `StoreError`: every failure reduced to a kind tag plus a readable message
//! - `DocumentStore`: the async seam the autosave coordinator is generic over
//! - `FirestoreClient`: the REST implementation
//!
//! Request mapping:
//! ```text
//! create_or_replace ──► PATCH {base}/{path}                      body {"fields": ...}
//! patch             ──► PATCH {base}/{path}?updateMask.fieldPaths=k   body {"fields": ...}
//! fetch             ──► GET   {base}/{path}
//! ```
//!
//! No call is retried here; each failure is reported once.

use std::fmt;

use async_trait::async_trait;
use neurolink_core::Record;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::Credential;
use crate::codec::{self, WireFields};
use crate::config::StoreConfig;

/// Substituted when a failed response carries no readable error envelope.
pub const UNKNOWN_STORE_ERROR: &str = "unknown store error";

/// Failure classes surfaced by the document client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed document does not exist.
    NotFound,
    /// The store answered with a non-success status.
    Http,
    /// The request never got a complete answer (DNS, connect, timeout, reset).
    Network,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Http => write!(f, "store error"),
            ErrorKind::Network => write!(f, "network error"),
        }
    }
}

/// A classified store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when the store answered.
    pub status: Option<u16>,
}

impl StoreError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
            status: Some(StatusCode::NOT_FOUND.as_u16()),
        }
    }

    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Http,
            message: message.into(),
            status,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Network,
            message: message.into(),
            status: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Error envelope returned by Google REST APIs: `{"error": {"message": ...}}`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Extract `error.message` from a failed response body.
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|message| !message.is_empty())
}

/// Render an error with its whole source chain, e.g.
/// `error sending request: client error (Connect): connection refused`.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

/// Classify a non-success response.
pub fn classify_failure(status: StatusCode, body: &[u8]) -> StoreError {
    let message = error_message(body).unwrap_or_else(|| UNKNOWN_STORE_ERROR.to_string());
    if status == StatusCode::NOT_FOUND {
        StoreError::not_found(message)
    } else {
        StoreError::http(Some(status.as_u16()), message)
    }
}

// ─── Paths ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("document path is empty")]
    Empty,
    #[error("segment {0} of the document path is empty")]
    EmptySegment(usize),
    #[error("segment {0} of the document path contains '/'")]
    SlashInSegment(usize),
    #[error("`{0}` names a collection, not a document")]
    NotADocument(String),
}

/// Address of one document: alternating collection / id segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn new<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(index));
            }
            if segment.contains('/') {
                return Err(PathError::SlashInSegment(index));
            }
        }
        if segments.len() % 2 != 0 {
            return Err(PathError::NotADocument(segments.join("/")));
        }
        Ok(Self { segments })
    }

    /// Parse a slash-separated path such as `users/u1/pet_data/current`.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        Self::new(trimmed.split('/'))
    }

    /// The pet document owned by `user_id`.
    pub fn pet_document(user_id: &str) -> Result<Self, PathError> {
        Self::new(["users", user_id, "pet_data", "current"])
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

// ─── Documents ───────────────────────────────────────────────────────────────

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Record,
    /// Server-side modification time, when reported.
    pub update_time: Option<String>,
}

#[derive(Serialize)]
struct WriteBody<'a> {
    fields: &'a WireFields,
}

/// Async document store seam.
///
/// Implementations are stateless and reentrant; the credential travels with
/// every call.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Upsert: create the document if absent, replace all of its fields otherwise.
    async fn create_or_replace(
        &self,
        path: &DocumentPath,
        fields: &Record,
        credential: &Credential,
    ) -> Result<Document, StoreError>;

    /// Read a document. A missing document is `ErrorKind::NotFound`.
    async fn fetch(&self, path: &DocumentPath, credential: &Credential)
        -> Result<Document, StoreError>;

    /// Merge the given top-level fields, leaving the others untouched.
    async fn patch(
        &self,
        path: &DocumentPath,
        fields: &Record,
        credential: &Credential,
    ) -> Result<Document, StoreError>;
}

/// Quote a field name for use in an update mask.
///
/// Plain identifiers go through as-is; anything else is back-quoted with `\`
/// escapes for `` ` `` and `\`.
pub fn mask_field_path(key: &str) -> String {
    let mut chars = key.chars();
    let simple = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        key.to_string()
    } else {
        format!("`{}`", key.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Firestore REST client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: reqwest::Client,
    base_url: Url,
}

impl FirestoreClient {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::network(format!("failed to build HTTP client: {}", error_chain(&e))))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full URL of a document.
    pub fn document_url(&self, path: &DocumentPath) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::http(None, format!("store url `{}` cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(path.segments());
        Ok(url)
    }

    async fn write(
        &self,
        path: &DocumentPath,
        fields: &Record,
        credential: &Credential,
        mask: Option<Vec<String>>,
    ) -> Result<Document, StoreError> {
        let mut url = self.document_url(path)?;
        if let Some(mask) = &mask {
            let mut query = url.query_pairs_mut();
            for field in mask {
                query.append_pair("updateMask.fieldPaths", field);
            }
        }
        let wire = codec::encode_fields(fields);
        log::debug!(
            "PATCH {path} ({} fields, {})",
            wire.len(),
            if mask.is_some() { "merge" } else { "replace" }
        );
        let request = self
            .http
            .request(Method::PATCH, url)
            .bearer_auth(&credential.id_token)
            .json(&WriteBody { fields: &wire });
        self.send(request, path).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        path: &DocumentPath,
    ) -> Result<Document, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::network(error_chain(&e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| StoreError::network(error_chain(&e)))?;

        if !status.is_success() {
            let err = classify_failure(status, &body);
            log::debug!("{path}: {err} (HTTP {status})");
            return Err(err);
        }
        parse_document(path, status, &body)
    }
}

fn parse_document(path: &DocumentPath, status: StatusCode, body: &[u8]) -> Result<Document, StoreError> {
    let json: Value = serde_json::from_slice(body).map_err(|e| {
        StoreError::http(Some(status.as_u16()), format!("malformed store response: {e}"))
    })?;
    Ok(Document {
        path: path.clone(),
        fields: json
            .get("fields")
            .map(codec::decode_fields_json)
            .unwrap_or_default(),
        update_time: json
            .get("updateTime")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn create_or_replace(
        &self,
        path: &DocumentPath,
        fields: &Record,
        credential: &Credential,
    ) -> Result<Document, StoreError> {
        self.write(path, fields, credential, None).await
    }

    async fn fetch(
        &self,
        path: &DocumentPath,
        credential: &Credential,
    ) -> Result<Document, StoreError> {
        let url = self.document_url(path)?;
        log::debug!("GET {path}");
        let request = self
            .http
            .request(Method::GET, url)
            .bearer_auth(&credential.id_token);
        self.send(request, path).await
    }

    async fn patch(
        &self,
        path: &DocumentPath,
        fields: &Record,
        credential: &Credential,
    ) -> Result<Document, StoreError> {
        // An empty update mask would turn the request into a full replace.
        if fields.is_empty() {
            return self.fetch(path, credential).await;
        }
        let mask = fields.keys().map(|key| mask_field_path(key)).collect();
        self.write(path, fields, credential, Some(mask)).await
    }
}
