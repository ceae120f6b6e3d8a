//! HTTP plumbing shared by all adapters
//!
//! - [`HttpFetcher`]: authenticated GET, JSON decoding, streamed downloads
//! - [`checksum`]: SHA-256 over files on disk
//! - [`validator`]: existence checks that see through HTML search pages

pub mod checksum;
pub mod validator;

pub use checksum::{compute_sha256, compute_sha256_async, update_manifest_checksum, verify_sha256};
pub use validator::ModelValidator;

use crate::error::{InstallError, InstallResult};
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("modelpack/", env!("CARGO_PKG_VERSION"));

/// Maximum redirects followed by any client
pub const MAX_REDIRECTS: usize = 10;

/// Progress callback: `(bytes_downloaded, bytes_total)`. Total is 0 when unknown.
///
/// May be invoked concurrently from several download workers.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Build the HTTP client used by fetchers and validators
pub fn build_client(timeout: Duration) -> InstallResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(30)))
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()?;
    Ok(client)
}

/// Authenticated GET helper, one per adapter instance
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token: Option<String>,
    auth_scheme: &'static str,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, token: Option<String>) -> InstallResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            token: token.filter(|t| !t.is_empty()),
            auth_scheme: "Bearer",
        })
    }

    /// Use a different `Authorization` scheme (GitHub accepts `token <pat>`)
    pub fn with_auth_scheme(mut self, scheme: &'static str) -> Self {
        self.auth_scheme = scheme;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("{} {}", self.auth_scheme, token)),
            None => request,
        }
    }

    /// GET returning the response for any 2xx status
    pub async fn get(&self, url: &str) -> InstallResult<reqwest::Response> {
        let response = self.request(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Whether a GET on `url` answers 2xx; 404 is `false`, other statuses are errors
    pub async fn exists(&self, url: &str) -> InstallResult<bool> {
        match self.get(url).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found_status() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_bytes(&self, url: &str) -> InstallResult<Vec<u8>> {
        let response = self.get(url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn get_text(&self, url: &str) -> InstallResult<String> {
        let response = self.get(url).await?;
        Ok(response.text().await?)
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> InstallResult<T> {
        let response = self.request(url).header(ACCEPT, "application/json").send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Stream a URL into `dest`, returning the number of bytes written
    ///
    /// A partially written file is removed on failure.
    pub async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&ProgressCallback>,
    ) -> InstallResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.get(url).await?;
        let total = response.content_length().unwrap_or(0);

        let result = stream_to_file(response, dest, total, progress).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        let written = result?;

        tracing::debug!(url = %url, dest = ?dest, bytes = written, "Downloaded file");
        Ok(written)
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    dest: &Path,
    total: u64,
    progress: Option<&ProgressCallback>,
) -> InstallResult<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if let Some(progress) = progress {
            progress(downloaded, total);
        }
    }

    file.flush().await?;
    Ok(downloaded)
}
