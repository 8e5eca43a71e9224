//! Asset store HTTP client.
//!
//! Async client using `reqwest` with Bearer token authentication. File
//! bodies are streamed from disk rather than buffered.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Body, RequestBuilder, Response};
use sitesync_deploy::{AssetStore, StoreError, StoreFuture};
use sitesync_protocol::{CreateDeployRequest, DeployRecord, FunctionUploadParams};
use sitesync_transfer::UploadSource;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Header telling the store how many times a function upload was retried.
pub const RETRY_COUNT_HEADER: &str = "X-Nf-Retry-Count";

/// Characters left as-is in a path segment (RFC 3986 unreserved).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Errors from the store client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid API token")]
    InvalidToken,
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Http(e) if e.is_decode() => StoreError::Decode(e.to_string()),
            Error::Http(e) => StoreError::Network(e.to_string()),
            Error::Api { status, body } => StoreError::Status { status, body },
            Error::Json(e) => StoreError::Decode(e.to_string()),
            Error::Io(e) => StoreError::Io(e),
            Error::InvalidToken => StoreError::Decode("invalid API token".into()),
        }
    }
}

/// Asset store API client.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Creates a client for the API rooted at `base_url`.
    pub fn new(base_url: &str, token: &str) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut auth =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| Error::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request and turns non-success statuses into [`Error::Api`].
    async fn send(&self, request: RequestBuilder) -> Result<Response, Error> {
        let resp = request.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<DeployRecord, Error> {
        let body = self.send(request).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Creates a deploy from file and function manifests.
    pub async fn create_deploy(
        &self,
        site_id: &str,
        request: &CreateDeployRequest,
    ) -> Result<DeployRecord, Error> {
        let url = self.url(&format!("/sites/{}/deploys", encode_segment(site_id)));
        self.send_json(self.http.post(url).json(request)).await
    }

    /// Resubmits manifests for an existing deploy.
    pub async fn update_deploy(
        &self,
        site_id: &str,
        deploy_id: &str,
        request: &CreateDeployRequest,
    ) -> Result<DeployRecord, Error> {
        let url = self.url(&format!(
            "/sites/{}/deploys/{}",
            encode_segment(site_id),
            encode_segment(deploy_id)
        ));
        self.send_json(self.http.put(url).json(request)).await
    }

    pub async fn get_deploy(&self, deploy_id: &str) -> Result<DeployRecord, Error> {
        let url = self.url(&format!("/deploys/{}", encode_segment(deploy_id)));
        self.send_json(self.http.get(url)).await
    }

    pub async fn cancel_deploy(&self, deploy_id: &str) -> Result<(), Error> {
        let url = self.url(&format!("/deploys/{}/cancel", encode_segment(deploy_id)));
        self.send(self.http.post(url)).await?;
        Ok(())
    }

    /// Uploads one file to `path` within the deploy.
    pub async fn upload_file(
        &self,
        deploy_id: &str,
        path: &str,
        source: &UploadSource,
    ) -> Result<(), Error> {
        let url = self.url(&format!(
            "/deploys/{}/files/{}",
            encode_segment(deploy_id),
            encode_path(path)
        ));
        let request = self.with_body(self.http.put(url), source).await?;
        self.send(request).await?;
        debug!(deploy_id, path, "file uploaded");
        Ok(())
    }

    /// Uploads one function archive with its runtime metadata.
    pub async fn upload_function(
        &self,
        deploy_id: &str,
        name: &str,
        source: &UploadSource,
        params: &FunctionUploadParams,
        retry_count: u32,
    ) -> Result<(), Error> {
        let url = self.url(&format!(
            "/deploys/{}/functions/{}",
            encode_segment(deploy_id),
            encode_segment(name)
        ));
        let mut request = self.http.put(url).query(&params.query_pairs());
        if retry_count > 0 {
            request = request.header(RETRY_COUNT_HEADER, retry_count.to_string());
        }
        let request = self.with_body(request, source).await?;
        self.send(request).await?;
        debug!(deploy_id, name, retry_count, "function uploaded");
        Ok(())
    }

    /// Attaches the upload body, streaming files from disk.
    async fn with_body(
        &self,
        request: RequestBuilder,
        source: &UploadSource,
    ) -> Result<RequestBuilder, Error> {
        let request = request.header(CONTENT_TYPE, "application/octet-stream");
        let request = match source {
            UploadSource::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let len = file.metadata().await?.len();
                request
                    .header(CONTENT_LENGTH, len)
                    .body(Body::wrap_stream(ReaderStream::new(file)))
            }
            UploadSource::Inline(bytes) => request.body(bytes.to_vec()),
        };
        Ok(request)
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Percent-encodes each segment of a forward-slash path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

impl AssetStore for Client {
    fn create_deploy<'a>(
        &'a self,
        site_id: &'a str,
        request: &'a CreateDeployRequest,
    ) -> StoreFuture<'a, DeployRecord> {
        Box::pin(async move { Ok(Client::create_deploy(self, site_id, request).await?) })
    }

    fn update_deploy<'a>(
        &'a self,
        site_id: &'a str,
        deploy_id: &'a str,
        request: &'a CreateDeployRequest,
    ) -> StoreFuture<'a, DeployRecord> {
        Box::pin(async move { Ok(Client::update_deploy(self, site_id, deploy_id, request).await?) })
    }

    fn upload_file<'a>(
        &'a self,
        deploy_id: &'a str,
        path: &'a str,
        body: &'a UploadSource,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { Ok(Client::upload_file(self, deploy_id, path, body).await?) })
    }

    fn upload_function<'a>(
        &'a self,
        deploy_id: &'a str,
        name: &'a str,
        body: &'a UploadSource,
        params: &'a FunctionUploadParams,
        retry_count: u32,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            Ok(Client::upload_function(self, deploy_id, name, body, params, retry_count).await?)
        })
    }

    fn get_deploy<'a>(&'a self, deploy_id: &'a str) -> StoreFuture<'a, DeployRecord> {
        Box::pin(async move { Ok(Client::get_deploy(self, deploy_id).await?) })
    }

    fn cancel_deploy<'a>(&'a self, deploy_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move { Ok(Client::cancel_deploy(self, deploy_id).await?) })
    }
}
