use std::time::Duration;

use rand::Rng;
use regex_lite::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::{Client, StatusCode};
use solvetrack_core::Username;

/// Label phrase that marks the statistic heading on a profile page.
pub const SOLVED_LABEL: &str = "Problems Solved";

const DEFAULT_BASE_URL: &str = "https://www.codechef.com/users";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Http(u16),
    #[error("retries exhausted")]
    RetriesExhausted,
    #[error("invalid jitter range: min_delay_ms {min} > max_delay_ms {max}")]
    InvalidJitter { min: u64, max: u64 },
}

/// Scraper tuning knobs. Defaults match the production profile site and
/// its tolerance for polite sequential crawling.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Profile URL prefix; the username is appended as one path segment.
    pub base_url: String,
    /// Per-request timeout in seconds (default: 10)
    pub timeout_secs: u64,
    /// Retries for transient statuses and transport errors (default: 5)
    pub max_retries: u32,
    /// Base backoff in milliseconds, doubled per attempt (default: 1000)
    pub retry_delay_ms: u64,
    /// Lower bound of the inter-request jitter (default: 1500)
    pub min_delay_ms: u64,
    /// Upper bound of the inter-request jitter (default: 3500)
    pub max_delay_ms: u64,
    /// Browser-mimicking user agent
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            max_retries: 5,
            retry_delay_ms: 1000,
            min_delay_ms: 1500,
            max_delay_ms: 3500,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Single-profile fetch unit plus the sequential batch loop over it.
pub struct ProfileFetcher {
    client: Client,
    config: FetchConfig,
}

impl ProfileFetcher {
    /// Build a fetcher with a browser-like header set and fixed timeout.
    ///
    /// # Errors
    /// Returns `ScrapeError::InvalidJitter` when the delay bounds are
    /// inverted, `ScrapeError::Client` when the underlying client cannot
    /// be constructed.
    pub fn new(config: FetchConfig) -> Result<Self, ScrapeError> {
        if config.min_delay_ms > config.max_delay_ms {
            return Err(ScrapeError::InvalidJitter {
                min: config.min_delay_ms,
                max: config.max_delay_ms,
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()
            .map_err(ScrapeError::Client)?;

        Ok(Self { client, config })
    }

    /// Fetch one profile and extract the solved count.
    ///
    /// `None` means the request itself failed after retries (FetchFailed).
    /// A reachable page with no matching label or an unparsable trailing
    /// token yields `Some(0)` — a found-but-empty profile is not a network
    /// failure.
    pub async fn fetch_solved(&self, username: &Username) -> Option<u32> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), username);
        match self.get_with_retry(&url).await {
            Ok(body) => Some(extract_solved_count(&body)),
            Err(err) => {
                tracing::warn!(username = %username, error = %err, "profile fetch failed");
                None
            }
        }
    }

    /// Scrape a sequence of usernames strictly in order, one request at a
    /// time, sleeping a uniformly random delay before each request.
    ///
    /// The output always has the same length as the input; a failed fetch
    /// leaves `None` in its slot and never aborts the batch. Downstream
    /// code zips results with usernames positionally.
    pub async fn scrape_batch(&self, usernames: &[Username]) -> Vec<Option<u32>> {
        let mut results = Vec::with_capacity(usernames.len());
        for username in usernames {
            let wait_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(self.config.min_delay_ms..=self.config.max_delay_ms)
            };
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;

            let solved = self.fetch_solved(username).await;
            tracing::info!(username = %username, solved = ?solved, "scraped profile");
            results.push(solved);
        }
        results
    }

    /// GET with retry on transient statuses (429/500/502/503/504) and
    /// transport errors, exponential backoff between attempts.
    async fn get_with_retry(&self, url: &str) -> Result<String, ScrapeError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_delay_ms << (attempt - 1);
                tracing::debug!(url, attempt, backoff_ms = backoff, "retrying profile request");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }
                    if is_retryable(status) {
                        last_error = Some(ScrapeError::Http(status.as_u16()));
                        continue;
                    }
                    return Err(ScrapeError::Http(status.as_u16()));
                }
                Err(err) => {
                    last_error = Some(ScrapeError::Transport(err));
                }
            }
        }

        Err(last_error.unwrap_or(ScrapeError::RetriesExhausted))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Locate the statistic heading and parse its trailing integer.
///
/// Returns 0 when no heading contains the label or the final
/// whitespace-separated token is not a number.
#[must_use]
pub fn extract_solved_count(html: &str) -> u32 {
    let Ok(heading) = Regex::new(r"<h3[^>]*>([^<]*)</h3>") else {
        return 0;
    };
    for cap in heading.captures_iter(html) {
        let Some(text) = cap.get(1) else { continue };
        let text = decode_entities(text.as_str()).trim().to_string();
        if !text.contains(SOLVED_LABEL) {
            continue;
        }
        return text
            .split_whitespace()
            .last()
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);
    }
    0
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trailing_count_from_labeled_heading() {
        let html = "<html><body><h3>Total Problems Solved 42</h3></body></html>";
        assert_eq!(extract_solved_count(html), 42);
    }

    #[test]
    fn heading_attributes_do_not_block_the_match() {
        let html = r#"<h3 class="stat" id="solved">Problems Solved 317</h3>"#;
        assert_eq!(extract_solved_count(html), 317);
    }

    #[test]
    fn missing_label_yields_zero() {
        let html = "<h3>Contest Rating 1732</h3><h1>Problems Solved 9</h1>";
        assert_eq!(extract_solved_count(html), 0);
    }

    #[test]
    fn non_numeric_trailing_token_yields_zero() {
        let html = "<h3>Problems Solved none</h3>";
        assert_eq!(extract_solved_count(html), 0);
    }

    #[test]
    fn bare_label_yields_zero() {
        let html = "<h3>Problems Solved</h3>";
        assert_eq!(extract_solved_count(html), 0);
    }

    #[test]
    fn entities_are_decoded_before_matching() {
        let html = "<h3>Problems&nbsp;Solved 5</h3>";
        assert_eq!(extract_solved_count(html), 5);
    }

    #[test]
    fn first_matching_heading_wins() {
        let html = "<h3>Problems Solved 10</h3><h3>Problems Solved 99</h3>";
        assert_eq!(extract_solved_count(html), 10);
    }

    fn unreachable_fetcher() -> ProfileFetcher {
        let config = FetchConfig {
            // Discard port on loopback: refused immediately, no network.
            base_url: "http://127.0.0.1:9/users".to_string(),
            timeout_secs: 1,
            max_retries: 0,
            retry_delay_ms: 1,
            min_delay_ms: 0,
            max_delay_ms: 1,
            ..FetchConfig::default()
        };
        match ProfileFetcher::new(config) {
            Ok(fetcher) => fetcher,
            Err(err) => panic!("failed to build fetcher: {err}"),
        }
    }

    fn username(value: &str) -> Username {
        match Username::parse(value) {
            Ok(name) => name,
            Err(err) => panic!("invalid test username: {err}"),
        }
    }

    #[test]
    fn inverted_jitter_bounds_are_rejected_at_build_time() {
        let config = FetchConfig {
            min_delay_ms: 500,
            max_delay_ms: 100,
            ..FetchConfig::default()
        };
        assert!(matches!(
            ProfileFetcher::new(config),
            Err(ScrapeError::InvalidJitter { min: 500, max: 100 })
        ));
    }

    #[tokio::test]
    async fn batch_output_length_matches_input_with_failures() {
        let fetcher = unreachable_fetcher();
        let users = vec![username("alice"), username("bob"), username("alice")];
        let results = fetcher.scrape_batch(&users).await;
        assert_eq!(results.len(), users.len());
        assert!(results.iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_output() {
        let fetcher = unreachable_fetcher();
        let results = fetcher.scrape_batch(&[]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn unreachable_profile_is_a_fetch_failure_not_zero() {
        let fetcher = unreachable_fetcher();
        assert_eq!(fetcher.fetch_solved(&username("alice")).await, None);
    }
}
