use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::upload::{ProgressFn, UploadSource};

const DEFAULT_BASE_URL: &str = "https://api.stratus.example";
const OVER_QUOTA_CODE: &str = "over_quota";

#[derive(Debug, Error)]
pub enum StratusError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    QuotaExceeded,
    NameConflict,
    PayloadTooLarge,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct StratusClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl StratusClient {
    pub fn new(token: impl Into<String>) -> Result<Self, StratusError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, StratusError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_node_id: &str,
    ) -> Result<Node, StratusError> {
        let url = self.node_endpoint(parent_node_id, "folders")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&CreateFolderRequest { name })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Streams `source` into `parent_node_id` under `name`.
    ///
    /// `progress` receives `(bytes_sent, total_bytes)` each time a chunk is handed
    /// to the transport. Dropping the returned future aborts the transfer.
    pub async fn upload_file(
        &self,
        parent_node_id: &str,
        name: &str,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<Node, StratusError> {
        let mut url = self.node_endpoint(parent_node_id, "content")?;
        url.query_pairs_mut().append_pair("name", name);
        let (body, total) = source.into_body(progress).await?;
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .header(CONTENT_LENGTH, total)
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn node_endpoint(&self, node_id: &str, tail: &str) -> Result<Url, StratusError> {
        let mut url = self.base_url.join("/v1/nodes/")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(node_id)
            .push(tail);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StratusError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StratusError::Api { status, body })
        }
    }
}

impl StratusError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            StratusError::Request(_) => ApiErrorClass::Transient,
            StratusError::Api { status, body } => classify_api_status(*status, body),
            StratusError::Url(_) | StratusError::Io(_) => ApiErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classification() == ApiErrorClass::Transient
    }
}

fn classify_api_status(status: StatusCode, body: &str) -> ApiErrorClass {
    // Quota errors may arrive as 403 with a coded body, so check them before auth.
    if status == StatusCode::INSUFFICIENT_STORAGE
        || api_error_code(body).as_deref() == Some(OVER_QUOTA_CODE)
    {
        ApiErrorClass::QuotaExceeded
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::CONFLICT {
        ApiErrorClass::NameConflict
    } else if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiErrorClass::PayloadTooLarge
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn api_error_code(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| payload.error)
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

#[derive(Debug, Serialize)]
struct CreateFolderRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
}
