//! Remote model existence checks
//!
//! Model hubs rarely return a clean 404 for a missing model. Many answer
//! 200 with an HTML search page, or redirect to a generic listing. The
//! validator treats those as "not found" while giving gated or flaky
//! endpoints (401/403/5xx) the benefit of the doubt.

use crate::error::InstallResult;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, RANGE};

/// How much of an HTML body is inspected
const HTML_PROBE_BYTES: usize = 2048;

const SEARCH_PAGE_TITLES: [&str; 2] = ["<title>find pre-trained models", "<title>search"];
const PUBLISHER_PATH_MARKERS: [&str; 3] = ["/google/", "/tensorflow/", "/publisher/"];

#[derive(Debug, Clone)]
pub struct ModelValidator {
    client: reqwest::Client,
}

impl ModelValidator {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Check whether a model page exists
    ///
    /// Transport failures are returned as errors; HTTP statuses are not.
    pub async fn exists(&self, url: &str) -> InstallResult<bool> {
        let mut response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-1023")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(url = %url, "Model page returned 404");
            return Ok(false);
        }
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(true);
        }
        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Assuming model exists despite status");
            return Ok(true);
        }

        let final_url = response.url().to_string();
        let redirected = reqwest::Url::parse(url)
            .map(|requested| requested != *response.url())
            .unwrap_or(true);
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_lowercase().contains("text/html"));

        if !is_html {
            return Ok(true);
        }

        let mut head = Vec::with_capacity(HTML_PROBE_BYTES);
        while head.len() < HTML_PROBE_BYTES {
            match response.chunk().await? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => break,
            }
        }
        head.truncate(HTML_PROBE_BYTES);
        let head = String::from_utf8_lossy(&head).to_lowercase();

        if is_search_page(&head) {
            tracing::debug!(url = %url, "Model page is a search page");
            return Ok(false);
        }
        if redirected && is_generic_listing(&final_url) {
            tracing::debug!(url = %url, final_url = %final_url, "Redirected to a generic model listing");
            return Ok(false);
        }

        Ok(true)
    }
}

fn is_search_page(html_head: &str) -> bool {
    SEARCH_PAGE_TITLES.iter().any(|t| html_head.contains(t))
}

fn is_generic_listing(url: &str) -> bool {
    let url = url.to_lowercase();
    url.contains("/models") && !PUBLISHER_PATH_MARKERS.iter().any(|m| url.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_page_detection() {
        assert!(is_search_page(
            "<html><head><title>find pre-trained models for tensorflow</title>"
        ));
        assert!(is_search_page("<title>search - hub</title>"));
        assert!(!is_search_page("<title>bert-base-uncased · hugging face</title>"));
    }

    #[test]
    fn test_generic_listing_detection() {
        assert!(is_generic_listing("https://www.kaggle.com/models?query=foo"));
        assert!(!is_generic_listing("https://www.kaggle.com/models/google/mobilenet-v2"));
        assert!(!is_generic_listing("https://tfhub.dev/tensorflow/bert"));
    }
}
