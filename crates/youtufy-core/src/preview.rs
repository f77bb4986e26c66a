//! Preview image fetching for selected results.

use std::time::Duration;

use crate::error::PreviewError;

const THUMBNAIL_BASE_URL: &str = "https://i.ytimg.com/vi";
const MAX_PREVIEW_BYTES: u64 = 4 * 1024 * 1024;

/// Conventional high-resolution thumbnail for a content id.
pub fn primary_preview_url(content_id: &str) -> String {
    format!("{THUMBNAIL_BASE_URL}/{content_id}/maxresdefault.jpg")
}

/// URLs to try in order: the templated high-resolution image, then the search thumbnail.
pub fn preview_candidates(content_id: &str, fallback_url: &str) -> Vec<String> {
    let mut urls = vec![primary_preview_url(content_id)];
    let fallback = fallback_url.trim();
    if !fallback.is_empty() && fallback != urls[0] {
        urls.push(fallback.to_string());
    }
    urls
}

/// Preview image returned by the thumbnail host.
#[derive(Debug, Clone)]
pub struct PreviewImage {
    pub url: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub struct PreviewClient {
    agent: ureq::Agent,
}

impl PreviewClient {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// Fetch the preview for `content_id`, falling back to `fallback_url` on failure.
    pub fn fetch_preview(
        &self,
        content_id: &str,
        fallback_url: &str,
    ) -> Result<PreviewImage, PreviewError> {
        let mut last_error = None;
        for url in preview_candidates(content_id, fallback_url) {
            match self.fetch(&url) {
                Ok(image) => return Ok(image),
                Err(e) => {
                    tracing::debug!(content_id, url = %url, error = %e, "preview candidate failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PreviewError::NotFound(content_id.to_string())))
    }

    fn fetch(&self, url: &str) -> Result<PreviewImage, PreviewError> {
        let resp = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::StatusCode(404) => PreviewError::NotFound(url.to_string()),
            other => PreviewError::Transport(other.to_string()),
        })?;
        let mime_type = resp
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = resp
            .into_body()
            .with_config()
            .limit(MAX_PREVIEW_BYTES)
            .read_to_vec()
            .map_err(|e| PreviewError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(PreviewError::NotFound(url.to_string()));
        }
        Ok(PreviewImage {
            url: url.to_string(),
            mime_type,
            bytes,
        })
    }
}
