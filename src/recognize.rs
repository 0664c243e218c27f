//! The recognition boundary: trait, wire types, and the HTTP reference client.
//!
//! The pipeline treats recognition as an opaque, occasionally-failing,
//! rate-limited remote call. Everything it needs is behind [`Recognizer`]:
//! hand an image path in, get ordered text segments back, or an error the
//! retry policy can classify. Tests plug in mock recognizers; production use
//! goes through [`HttpRecognizer`].
//!
//! This module is intentionally thin — batching, retries, and backoff all
//! live in the pipeline so they can be exercised without network I/O.

use crate::error::OcrError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// One recognised text fragment, in scan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSegment {
    /// Raw fragment text as returned by the endpoint.
    pub text: String,
}

/// The result of recognising one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recognition {
    /// Ordered text fragments; order is the endpoint's scan order and is
    /// preserved verbatim into text assembly.
    pub segments: Vec<TextSegment>,
    /// Detected language tag, if the endpoint reports one.
    pub language: Option<String>,
}

/// A failed recognition call.
///
/// Classification into rate-limit vs. other transient failures happens in
/// the retry policy, from the status code and message text; this type only
/// carries the facts.
#[derive(Debug, Clone, Error)]
pub enum RecognizeError {
    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The request never completed (connection refused, DNS, reset…).
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered 2xx but the body was not the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The image file could not be read from disk.
    #[error("failed to read image '{path}': {detail}")]
    ImageRead { path: PathBuf, detail: String },
}

impl RecognizeError {
    /// HTTP status code, when the failure was an HTTP response.
    pub fn status(&self) -> Option<u16> {
        match self {
            RecognizeError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// An external recognition capability.
///
/// Implementations must be cheap to share (`Arc<dyn Recognizer>`): one
/// instance serves every concurrent call in a run.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognise the text on one page image.
    async fn recognize(&self, image: &Path) -> Result<Recognition, RecognizeError>;
}

// ── HTTP reference implementation ────────────────────────────────────────

/// Wire format of the request body sent to the OCR endpoint.
#[derive(Serialize)]
struct OcrRequest<'a> {
    image: String,
    mime_type: &'a str,
}

/// Wire format of a successful endpoint response.
#[derive(Deserialize)]
struct OcrResponse {
    segments: Vec<WireSegment>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
struct WireSegment {
    text: String,
}

/// JSON-over-HTTP recognizer: POSTs the base64-encoded image to a configured
/// endpoint and decodes the segment list.
///
/// Base64-in-JSON is what every hosted OCR/vision endpoint in this space
/// accepts; the exact field names here match the companion recognition
/// service. 429 responses come back as [`RecognizeError::Status`] with the
/// body text preserved so the retry policy can classify them.
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRecognizer {
    /// Create a recognizer for `endpoint`, reading the API key from
    /// `api_key` (pass `None` for unauthenticated/local endpoints).
    ///
    /// The per-call timeout is owned by the retry policy, not the HTTP
    /// client, so the client itself is built without one.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, OcrError> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(OcrError::EndpointNotConfigured {
                hint: "Pass --endpoint or set OCR_ENDPOINT.".into(),
            });
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| OcrError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    fn mime_type(image: &Path) -> &'static str {
        match image
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "image/png",
        }
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, image: &Path) -> Result<Recognition, RecognizeError> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| RecognizeError::ImageRead {
                path: image.to_path_buf(),
                detail: e.to_string(),
            })?;

        let body = OcrRequest {
            image: STANDARD.encode(&bytes),
            mime_type: Self::mime_type(image),
        };
        debug!(
            image = %image.display(),
            bytes = bytes.len(),
            "sending recognition request"
        );

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RecognizeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RecognizeError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let decoded: OcrResponse = response
            .json()
            .await
            .map_err(|e| RecognizeError::InvalidResponse(e.to_string()))?;

        Ok(Recognition {
            segments: decoded
                .segments
                .into_iter()
                .map(|s| TextSegment { text: s.text })
                .collect(),
            language: decoded.language,
        })
    }
}
