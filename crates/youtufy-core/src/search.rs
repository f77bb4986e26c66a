//! Catalog search against the YouTube Data API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use youtufy_types::SearchResult;

use crate::error::SearchError;

pub const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

/// Title keywords that mark a result as music when filtering.
pub const MUSIC_KEYWORDS: [&str; 5] = ["music", "song", "track", "official video", "lyrics"];

const FILTERED_MAX_RESULTS: u32 = 10;
const UNFILTERED_MAX_RESULTS: u32 = 35;

/// Blocking search backend.
pub trait SearchBackend: Send + Sync {
    fn search(&self, query: &str, music_filter: bool) -> Result<Vec<SearchResult>, SearchError>;
}

pub struct YouTubeSearch {
    api_key: Option<String>,
    timeout: Duration,
    endpoint: String,
}

impl YouTubeSearch {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            timeout,
            endpoint: SEARCH_ENDPOINT.to_string(),
        }
    }

}

impl SearchBackend for YouTubeSearch {
    fn search(&self, query: &str, music_filter: bool) -> Result<Vec<SearchResult>, SearchError> {
        let key = self.api_key.as_deref().ok_or(SearchError::MissingApiKey)?;
        let url = build_search_url(&self.endpoint, key, query, music_filter);
        tracing::debug!(query, music_filter, "catalog search");

        let mut resp = ureq::get(&url)
            .config()
            .timeout_global(Some(self.timeout))
            .build()
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => SearchError::Status(code),
                other => SearchError::Transport(other.to_string()),
            })?;
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| SearchError::Transport(format!("read search response body: {e}")))?;

        let results = parse_search_response(&body)?;
        Ok(if music_filter {
            filter_music(results)
        } else {
            results
        })
    }
}

pub fn build_search_url(endpoint: &str, api_key: &str, query: &str, music_filter: bool) -> String {
    let (q, max_results) = if music_filter {
        (format!("{} music", query.trim()), FILTERED_MAX_RESULTS)
    } else {
        (query.trim().to_string(), UNFILTERED_MAX_RESULTS)
    };
    format!(
        "{endpoint}?part=snippet&type=video&maxResults={max_results}&q={}&key={}",
        urlencoding::encode(&q),
        urlencoding::encode(api_key)
    )
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: ItemId,
    snippet: Option<Snippet>,
}

#[derive(Deserialize, Default)]
struct ItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Deserialize, Default)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

/// Decode a search response. Items without a video id (channels, playlists) are skipped.
pub fn parse_search_response(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let resp: SearchResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Parse(e.to_string()))?;
    Ok(resp
        .items
        .into_iter()
        .filter_map(|item| {
            let content_id = item.id.video_id?;
            let snippet = item.snippet?;
            let thumbs = snippet.thumbnails;
            let preview_image_ref = thumbs
                .high
                .or(thumbs.medium)
                .or(thumbs.default)
                .map(|t| t.url)
                .unwrap_or_default();
            Some(SearchResult {
                title: decode_title(&snippet.title),
                content_id,
                preview_image_ref,
            })
        })
        .collect())
}

const MAX_ENTITY_LEN: usize = 12;

/// Decode HTML entities in a title one at a time. Stray `&` and unknown entities are kept verbatim.
pub fn decode_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let decoded = candidate
            .char_indices()
            .take(MAX_ENTITY_LEN)
            .find(|&(_, c)| c == ';')
            .and_then(|(end, _)| {
                let entity = &candidate[..=end];
                htmlescape::decode_html(entity).ok().map(|text| (text, end + 1))
            });
        match decoded {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &candidate[consumed..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn is_music_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    MUSIC_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Keep only music-looking results, preserving order.
pub fn filter_music(results: Vec<SearchResult>) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| is_music_title(&r.title))
        .collect()
}

/// Completion of one search request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub seq: u64,
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Set when the search failed; `results` is then empty.
    pub failure: Option<String>,
}

/// Runs searches off the caller's thread and tags each with a sequence number.
pub struct SearchWorker {
    backend: Arc<dyn SearchBackend>,
    seq: Arc<AtomicU64>,
    tx: Sender<SearchOutcome>,
}

impl SearchWorker {
    pub fn new(backend: Arc<dyn SearchBackend>) -> (Self, Receiver<SearchOutcome>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = Self {
            backend,
            seq: Arc::new(AtomicU64::new(0)),
            tx,
        };
        (worker, rx)
    }

    /// Sequence number of the most recently issued request.
    pub fn latest(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Start a search and return its sequence number.
    pub fn submit(&self, query: impl Into<String>, music_filter: bool) -> u64 {
        let query = query.into();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let backend = self.backend.clone();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name("youtufy-search".into())
            .spawn({
                let query = query.clone();
                move || {
                    let outcome = run_search(backend.as_ref(), seq, query, music_filter);
                    let _ = tx.send(outcome);
                }
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn search thread");
            let _ = self.tx.send(SearchOutcome {
                seq,
                query,
                results: Vec::new(),
                failure: Some(e.to_string()),
            });
        }
        seq
    }
}

fn run_search(backend: &dyn SearchBackend, seq: u64, query: String, music_filter: bool) -> SearchOutcome {
    match backend.search(&query, music_filter) {
        Ok(results) => {
            tracing::info!(seq, query = %query, count = results.len(), "search finished");
            SearchOutcome {
                seq,
                query,
                results,
                failure: None,
            }
        }
        Err(e) => {
            tracing::warn!(seq, query = %query, error = %e, "search failed");
            SearchOutcome {
                seq,
                query,
                results: Vec::new(),
                failure: Some(e.to_string()),
            }
        }
    }
}

/// Result list shown to the user. A completed search replaces it only if it is newer than the one shown.
#[derive(Debug, Default)]
pub struct SearchResults {
    applied_seq: u64,
    query: String,
    results: Vec<SearchResult>,
}

impl SearchResults {
    /// Apply `outcome` unless a higher-numbered search was already applied. Returns whether it was applied.
    pub fn apply(&mut self, outcome: SearchOutcome) -> bool {
        if outcome.seq <= self.applied_seq {
            tracing::debug!(seq = outcome.seq, applied = self.applied_seq, "stale search result dropped");
            return false;
        }
        self.applied_seq = outcome.seq;
        self.query = outcome.query;
        self.results = outcome.results;
        true
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn get(&self, index: usize) -> Option<&SearchResult> {
        self.results.get(index)
    }
}
