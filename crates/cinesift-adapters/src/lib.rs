//! Typed outbound clients for the movie metadata API and the content
//! advisory site, plus the retry/rate-limit plumbing they share.
//!
//! Both clients parse raw payloads into strongly-typed records at the fetch
//! boundary; nothing downstream ever touches untyped JSON or HTML.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use cinesift_core::{AdvisoryScores, MovieDraft, CERTIFICATIONS};

pub const CRATE_NAME: &str = "cinesift-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_transport_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Retry behaviour as plain data: attempt cap, exponential delay, jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            delay
        } else {
            delay + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
        }
    }
}

/// Minimum-interval gate owned by one client instance. Serializes that
/// client's outbound calls and spaces them at least `min_interval` apart.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata request budget exhausted")]
    QuotaExceeded,
    #[error("metadata http status {status}")]
    Http { status: u16 },
    #[error("metadata request failed after retries: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unusable metadata payload: {0}")]
    Payload(String),
}

/// Authoritative metadata lookups. `Ok(None)` means the source does not know
/// the title; `QuotaExceeded` means the request budget is gone for now.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn get_by_id(&self, external_id: &str) -> Result<Option<MovieDraft>, MetadataError>;
    async fn get_by_title(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<MovieDraft>, MetadataError>;
}

#[derive(Debug, Clone)]
pub struct MetadataClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub min_interval: Duration,
    pub retry: RetryPolicy,
}

impl MetadataClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
            min_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct MetadataClient {
    client: reqwest::Client,
    config: MetadataClientConfig,
    gate: RateGate,
}

impl MetadataClient {
    pub fn new(config: MetadataClientConfig) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;
        let gate = RateGate::new(config.min_interval);
        Ok(Self {
            client,
            config,
            gate,
        })
    }

    async fn request(&self, params: &[(&str, &str)]) -> Result<RawTitlePayload, MetadataError> {
        let mut last_transport: Option<reqwest::Error> = None;

        for attempt in 0..self.config.retry.max_attempts {
            self.gate.wait().await;
            let result = self
                .client
                .get(&self.config.base_url)
                .query(params)
                .query(&[("apikey", self.config.api_key.as_str())])
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<RawTitlePayload>()
                            .await
                            .map_err(|e| MetadataError::Payload(e.to_string()));
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt + 1 < self.config.retry.max_attempts
                    {
                        tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(MetadataError::Http {
                        status: status.as_u16(),
                    });
                }
                Err(err) => {
                    if classify_transport_error(&err) == RetryDisposition::Retryable
                        && attempt + 1 < self.config.retry.max_attempts
                    {
                        warn!(attempt, error = %err, "metadata call failed, retrying");
                        last_transport = Some(err);
                        tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(MetadataError::Transport(err));
                }
            }
        }

        Err(MetadataError::Transport(
            last_transport.expect("retry loop records the last transport error"),
        ))
    }
}

#[async_trait]
impl MetadataSource for MetadataClient {
    async fn get_by_id(&self, external_id: &str) -> Result<Option<MovieDraft>, MetadataError> {
        let payload = self.request(&[("i", external_id), ("plot", "full")]).await?;
        payload_outcome(payload)
    }

    async fn get_by_title(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<MovieDraft>, MetadataError> {
        let year_param = year.map(|y| y.to_string());
        let mut params = vec![("t", title), ("type", "movie"), ("plot", "full")];
        if let Some(y) = year_param.as_deref() {
            params.push(("y", y));
        }
        let payload = self.request(&params).await?;
        payload_outcome(payload)
    }
}

/// Wire shape of the metadata API's title payload. Absent fields and the
/// source's `"N/A"` sentinel both collapse to `None` during conversion.
#[derive(Debug, Clone, Deserialize)]
struct RawTitlePayload {
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
    #[serde(rename = "imdbID")]
    external_id: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "Runtime")]
    runtime: Option<String>,
    #[serde(rename = "Genre")]
    genre: Option<String>,
    #[serde(rename = "Rated")]
    rated: Option<String>,
    #[serde(rename = "Plot")]
    plot: Option<String>,
    #[serde(rename = "Director")]
    director: Option<String>,
    #[serde(rename = "Actors")]
    actors: Option<String>,
    #[serde(rename = "Poster")]
    poster: Option<String>,
    #[serde(rename = "imdbRating")]
    audience_rating: Option<String>,
    #[serde(rename = "Metascore")]
    metascore: Option<String>,
    #[serde(rename = "Awards")]
    awards: Option<String>,
    #[serde(rename = "Ratings", default)]
    ratings: Vec<RawRating>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRating {
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Value")]
    value: String,
}

fn payload_outcome(payload: RawTitlePayload) -> Result<Option<MovieDraft>, MetadataError> {
    if payload.response.as_deref() == Some("False") {
        let message = payload.error.unwrap_or_else(|| "unknown error".to_string());
        let lowered = message.to_lowercase();
        if lowered.contains("not found") {
            return Ok(None);
        }
        if lowered.contains("request limit") {
            return Err(MetadataError::QuotaExceeded);
        }
        return Err(MetadataError::Payload(message));
    }
    parse_draft(payload).map(Some)
}

fn parse_draft(payload: RawTitlePayload) -> Result<MovieDraft, MetadataError> {
    let external_id = scrub(payload.external_id)
        .ok_or_else(|| MetadataError::Payload("payload missing external id".into()))?;
    let title = scrub(payload.title)
        .ok_or_else(|| MetadataError::Payload("payload missing title".into()))?;
    let year = scrub(payload.year)
        .and_then(|y| parse_leading_year(&y))
        .ok_or_else(|| MetadataError::Payload("payload missing release year".into()))?;

    let (critics_rating, ratings_metascore) = parse_ratings(&payload.ratings);
    let metascore = ratings_metascore.or_else(|| {
        scrub(payload.metascore).and_then(|m| m.parse::<i32>().ok())
    });

    let awards_summary = scrub(payload.awards);
    let (awards_won, award_nominations) = parse_award_counts(awards_summary.as_deref());

    Ok(MovieDraft {
        external_id,
        title,
        year,
        runtime_minutes: scrub(payload.runtime)
            .and_then(|r| r.trim_end_matches(" min").trim().parse::<i32>().ok()),
        genres: scrub(payload.genre).map(split_list).unwrap_or_default(),
        certification: scrub(payload.rated).map(|r| {
            if CERTIFICATIONS.contains(&r.as_str()) {
                r
            } else {
                "Not Rated".to_string()
            }
        }),
        plot: scrub(payload.plot),
        director: scrub(payload.director),
        cast: scrub(payload.actors).map(split_list).unwrap_or_default(),
        poster_url: scrub(payload.poster),
        audience_rating: scrub(payload.audience_rating).and_then(|v| v.parse::<f64>().ok()),
        critics_rating,
        metascore,
        awards_summary,
        awards_won,
        award_nominations,
    })
}

fn scrub(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "N/A" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Serials arrive as ranges ("2008–2013"); the release year is the first one.
fn parse_leading_year(raw: &str) -> Option<i32> {
    raw.split(['\u{2013}', '-'])
        .next()
        .and_then(|part| part.trim().parse::<i32>().ok())
}

fn split_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_ratings(ratings: &[RawRating]) -> (Option<i32>, Option<i32>) {
    let mut critics = None;
    let mut metascore = None;
    for rating in ratings {
        if rating.source.contains("Rotten Tomatoes") {
            critics = rating.value.trim_end_matches('%').parse::<i32>().ok();
        } else if rating.source.contains("Metacritic") {
            metascore = rating
                .value
                .split('/')
                .next()
                .and_then(|v| v.trim().parse::<i32>().ok());
        }
    }
    (critics, metascore)
}

static AWARD_WINS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*wins?").expect("valid award wins pattern"));
static AWARD_WON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)won\s+(\d+)").expect("valid award won pattern"));
static AWARD_NOMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*nominations?").expect("valid nominations pattern"));
static AWARD_NOMINATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)nominated\s+for\s+(\d+)").expect("valid nominated-for pattern")
});

fn parse_award_counts(summary: Option<&str>) -> (i32, i32) {
    let Some(text) = summary else {
        return (0, 0);
    };
    let sum = |re: &Regex| {
        re.captures_iter(text)
            .filter_map(|c| c[1].parse::<i32>().ok())
            .sum::<i32>()
    };
    let wins = sum(&AWARD_WINS_RE) + sum(&AWARD_WON_RE);
    let nominations = sum(&AWARD_NOMS_RE) + sum(&AWARD_NOMINATED_RE);
    (wins, nominations)
}

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("no advisory score pattern matched {url}")]
    Parse { url: String },
    #[error("advisory http status {status} for {url}")]
    Http { status: u16, url: String },
    #[error("advisory request failed after retries: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One entry on an advisory index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryListing {
    pub title: String,
    pub year: Option<i32>,
    pub url: String,
}

/// Parsed advisory detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryPage {
    pub title: String,
    pub year: Option<i32>,
    pub scores: AdvisoryScores,
    pub url: String,
}

/// Scraped advisory listings and scores. `fetch_scores` returns `Ok(None)`
/// when the page is gone and `AdvisoryError::Parse` when no known score
/// pattern matches.
#[async_trait]
pub trait AdvisorySource: Send + Sync {
    async fn list_candidates(&self, page: u32) -> Result<Vec<AdvisoryListing>, AdvisoryError>;
    async fn fetch_scores(&self, url: &str) -> Result<Option<AdvisoryPage>, AdvisoryError>;
}

#[derive(Debug, Clone)]
pub struct AdvisoryScraperConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub min_interval: Duration,
    pub retry: RetryPolicy,
}

impl AdvisoryScraperConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: "cinesift-bot/0.1".to_string(),
            // The advisory site is slow; give it more room than the API.
            timeout: Duration::from_secs(15),
            min_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct AdvisoryScraper {
    client: reqwest::Client,
    config: AdvisoryScraperConfig,
    gate: RateGate,
}

impl AdvisoryScraper {
    pub fn new(config: AdvisoryScraperConfig) -> Result<Self, AdvisoryError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let gate = RateGate::new(config.min_interval);
        Ok(Self {
            client,
            config,
            gate,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<Option<String>, AdvisoryError> {
        let mut last_transport: Option<reqwest::Error> = None;

        for attempt in 0..self.config.retry.max_attempts {
            self.gate.wait().await;
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(Some(resp.text().await?));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt + 1 < self.config.retry.max_attempts
                    {
                        tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(AdvisoryError::Http {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(err) => {
                    if classify_transport_error(&err) == RetryDisposition::Retryable
                        && attempt + 1 < self.config.retry.max_attempts
                    {
                        warn!(attempt, error = %err, url, "advisory fetch failed, retrying");
                        last_transport = Some(err);
                        tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(AdvisoryError::Transport(err));
                }
            }
        }

        Err(AdvisoryError::Transport(
            last_transport.expect("retry loop records the last transport error"),
        ))
    }
}

#[async_trait]
impl AdvisorySource for AdvisoryScraper {
    async fn list_candidates(&self, page: u32) -> Result<Vec<AdvisoryListing>, AdvisoryError> {
        let url = format!("{}/search.php?p={page}", self.config.base_url);
        let Some(html) = self.fetch_page(&url).await? else {
            debug!(page, "advisory index page missing");
            return Ok(Vec::new());
        };
        Ok(parse_listings(&html, &self.config.base_url))
    }

    async fn fetch_scores(&self, url: &str) -> Result<Option<AdvisoryPage>, AdvisoryError> {
        let Some(html) = self.fetch_page(url).await? else {
            return Ok(None);
        };
        parse_score_page(&html, url).map(Some)
    }
}

static MOVIE_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.htm$").expect("valid movie page pattern"));
static TRAILING_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\((\d{4})\)\s*").expect("valid trailing year pattern"));
static SITE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[-\u{2013}|]\s*[^-\u{2013}|]*\.(?:com|net|org).*$")
        .expect("valid site suffix pattern")
});

fn parse_listings(html: &str, base_url: &str) -> Vec<AdvisoryListing> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").expect("valid static selector");

    let mut listings = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let text = anchor.text().collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if !href.contains("/movie/") && !MOVIE_PAGE_RE.is_match(href) {
            continue;
        }
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}/{}", base_url, href.trim_start_matches('/'))
        };
        let (title, year) = split_trailing_year(text);
        listings.push(AdvisoryListing { title, year, url });
    }
    listings
}

/// Splits a `"Title (1999)"` form into the bare title and year.
fn split_trailing_year(text: &str) -> (String, Option<i32>) {
    let year = TRAILING_YEAR_RE
        .captures(text)
        .and_then(|c| c[1].parse::<i32>().ok());
    let title = TRAILING_YEAR_RE.replace_all(text, " ");
    (title.split_whitespace().collect::<Vec<_>>().join(" "), year)
}

static SCORE_TRIPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)SEX[/&\s]+NUDITY\s*[:=]?\s*(\d{1,2}).*?VIOLENCE[/&\s]+GORE\s*[:=]?\s*(\d{1,2}).*?(?:LANGUAGE|PROFANITY)\s*[:=]?\s*(\d{1,2})",
    )
    .expect("valid score triple pattern")
});
static SEX_SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)SEX[/&\s]+NUDITY\s*[:=]?\s*(\d{1,2})").expect("valid sex score pattern")
});
static VIOLENCE_SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)VIOLENCE[/&\s]+GORE\s*[:=]?\s*(\d{1,2})").expect("valid violence score pattern")
});
static LANGUAGE_SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:LANGUAGE|PROFANITY)\s*[:=]?\s*(\d{1,2})").expect("valid language score pattern")
});

fn parse_score_page(html: &str, url: &str) -> Result<AdvisoryPage, AdvisoryError> {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");

    let raw_scores = extract_scores_from_text(&text)
        .or_else(|| extract_scores_from_elements(&document))
        .ok_or_else(|| AdvisoryError::Parse {
            url: url.to_string(),
        })?;

    let scores = AdvisoryScores {
        sex_nudity: raw_scores.0,
        violence_gore: raw_scores.1,
        profanity: raw_scores.2,
    }
    .validated()
    .map_err(|err| {
        warn!(url, error = %err, "advisory scores outside expected range");
        AdvisoryError::Parse {
            url: url.to_string(),
        }
    })?;

    let title_selector = Selector::parse("title").expect("valid static selector");
    let raw_title = document
        .select(&title_selector)
        .next()
        .map(|node| node.text().collect::<String>())
        .unwrap_or_default();
    let stripped = SITE_SUFFIX_RE.replace(raw_title.trim(), "");
    let (title, year) = split_trailing_year(stripped.trim());

    Ok(AdvisoryPage {
        title,
        year,
        scores,
        url: url.to_string(),
    })
}

fn extract_scores_from_text(text: &str) -> Option<(i16, i16, i16)> {
    if let Some(caps) = SCORE_TRIPLE_RE.captures(text) {
        return Some((
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        ));
    }

    let sex = SEX_SCORE_RE.captures(text)?.get(1)?.as_str().parse().ok()?;
    let violence = VIOLENCE_SCORE_RE
        .captures(text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    let language = LANGUAGE_SCORE_RE
        .captures(text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    Some((sex, violence, language))
}

/// Fallback for pages that present the scores inside dedicated elements
/// rather than the usual banner text.
fn extract_scores_from_elements(document: &Html) -> Option<(i16, i16, i16)> {
    let selector = Selector::parse(
        r#"[class*="score"], [class*="rating"], [class*="content-level"], [class*="content_level"]"#,
    )
    .expect("valid static selector");

    static FIRST_INT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d{1,2})").expect("valid integer pattern"));

    let mut found = Vec::new();
    for element in document.select(&selector) {
        let text = element.text().collect::<String>();
        if let Some(caps) = FIRST_INT_RE.captures(&text) {
            if let Ok(value) = caps[1].parse::<i16>() {
                if (0..=10).contains(&value) {
                    found.push(value);
                }
            }
        }
        if found.len() == 3 {
            break;
        }
    }

    if found.len() >= 3 {
        Some((found[0], found[1], found[2]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_payload() -> RawTitlePayload {
        serde_json::from_str(
            r#"{
                "Response": "True",
                "imdbID": "tt0133093",
                "Title": "The Matrix",
                "Year": "1999",
                "Runtime": "136 min",
                "Genre": "Action, Sci-Fi",
                "Rated": "R",
                "Plot": "A computer hacker learns the truth.",
                "Director": "Lana Wachowski, Lilly Wachowski",
                "Actors": "Keanu Reeves, Laurence Fishburne",
                "Poster": "https://posters.example/matrix.jpg",
                "imdbRating": "8.7",
                "Metascore": "N/A",
                "Awards": "Won 4 Oscars. 42 wins & 51 nominations total",
                "Ratings": [
                    {"Source": "Rotten Tomatoes", "Value": "87%"},
                    {"Source": "Metacritic", "Value": "73/100"}
                ]
            }"#,
        )
        .expect("fixture payload parses")
    }

    #[test]
    fn draft_parsing_covers_all_fields() {
        let draft = parse_draft(full_payload()).expect("parses");
        assert_eq!(draft.external_id, "tt0133093");
        assert_eq!(draft.title, "The Matrix");
        assert_eq!(draft.year, 1999);
        assert_eq!(draft.runtime_minutes, Some(136));
        assert_eq!(draft.genres, vec!["Action", "Sci-Fi"]);
        assert_eq!(draft.certification.as_deref(), Some("R"));
        assert_eq!(draft.cast.len(), 2);
        assert_eq!(draft.audience_rating, Some(8.7));
        assert_eq!(draft.critics_rating, Some(87));
        assert_eq!(draft.metascore, Some(73));
        assert_eq!(draft.awards_won, 46);
        assert_eq!(draft.award_nominations, 51);
    }

    #[test]
    fn year_ranges_take_the_first_year() {
        let mut payload = full_payload();
        payload.year = Some("2008\u{2013}2013".to_string());
        let draft = parse_draft(payload).expect("parses");
        assert_eq!(draft.year, 2008);
    }

    #[test]
    fn not_available_sentinels_collapse_to_none() {
        let mut payload = full_payload();
        payload.runtime = Some("N/A".to_string());
        payload.plot = Some("N/A".to_string());
        payload.poster = Some("N/A".to_string());
        payload.awards = Some("N/A".to_string());
        payload.ratings = vec![];
        let draft = parse_draft(payload).expect("parses");
        assert_eq!(draft.runtime_minutes, None);
        assert_eq!(draft.plot, None);
        assert_eq!(draft.poster_url, None);
        assert_eq!(draft.awards_summary, None);
        assert_eq!(draft.awards_won, 0);
        assert_eq!(draft.critics_rating, None);
        assert_eq!(draft.metascore, None);
    }

    #[test]
    fn unknown_certification_becomes_not_rated() {
        let mut payload = full_payload();
        payload.rated = Some("TV-MA".to_string());
        let draft = parse_draft(payload).expect("parses");
        assert_eq!(draft.certification.as_deref(), Some("Not Rated"));
    }

    #[test]
    fn missing_year_is_a_payload_error() {
        let mut payload = full_payload();
        payload.year = Some("N/A".to_string());
        assert!(matches!(
            parse_draft(payload),
            Err(MetadataError::Payload(_))
        ));
    }

    #[test]
    fn error_bodies_map_to_not_found_and_quota() {
        let not_found: RawTitlePayload = serde_json::from_str(
            r#"{"Response": "False", "Error": "Movie not found!"}"#,
        )
        .expect("fixture parses");
        assert!(matches!(payload_outcome(not_found), Ok(None)));

        let quota: RawTitlePayload = serde_json::from_str(
            r#"{"Response": "False", "Error": "Request limit reached!"}"#,
        )
        .expect("fixture parses");
        assert!(matches!(
            payload_outcome(quota),
            Err(MetadataError::QuotaExceeded)
        ));
    }

    #[test]
    fn award_counts_sum_all_patterns() {
        let (wins, noms) =
            parse_award_counts(Some("Won 2 Oscars. 159 wins & 163 nominations total"));
        assert_eq!(wins, 161);
        assert_eq!(noms, 163);
        assert_eq!(parse_award_counts(None), (0, 0));
    }

    #[test]
    fn listing_extraction_resolves_urls_and_years() {
        let html = r#"
            <html><body>
              <a href="/movie/the-iron-giant-1999.htm">The Iron Giant (1999)</a>
              <a href="https://advisories.example/reviews/heat1995.htm">Heat (1995)</a>
              <a href="/about.html">About us</a>
              <a href="/movie/untitled.htm"></a>
            </body></html>
        "#;
        let listings = parse_listings(html, "https://advisories.example");
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].title, "The Iron Giant");
        assert_eq!(listings[0].year, Some(1999));
        assert_eq!(
            listings[0].url,
            "https://advisories.example/movie/the-iron-giant-1999.htm"
        );
        assert_eq!(listings[1].url, "https://advisories.example/reviews/heat1995.htm");
    }

    #[test]
    fn banner_text_scores_parse() {
        let html = r#"
            <html><head><title>The Iron Giant (1999) - advisories.example.com</title></head>
            <body><p>SEX/NUDITY 1 | VIOLENCE/GORE 4 | LANGUAGE 3</p></body></html>
        "#;
        let page = parse_score_page(html, "https://advisories.example/x.htm").expect("parses");
        assert_eq!(page.title, "The Iron Giant");
        assert_eq!(page.year, Some(1999));
        assert_eq!(
            page.scores,
            AdvisoryScores {
                sex_nudity: 1,
                violence_gore: 4,
                profanity: 3
            }
        );
    }

    #[test]
    fn element_fallback_scores_parse() {
        let html = r#"
            <html><body>
              <span class="score-sex">2</span>
              <span class="score-violence">7</span>
              <span class="score-language">5</span>
            </body></html>
        "#;
        let page = parse_score_page(html, "https://advisories.example/y.htm").expect("parses");
        assert_eq!(
            page.scores,
            AdvisoryScores {
                sex_nudity: 2,
                violence_gore: 7,
                profanity: 5
            }
        );
    }

    #[test]
    fn out_of_range_scores_are_a_parse_error() {
        let html = "<html><body>SEX/NUDITY 11 | VIOLENCE/GORE 4 | LANGUAGE 3</body></html>";
        assert!(matches!(
            parse_score_page(html, "https://advisories.example/z.htm"),
            Err(AdvisoryError::Parse { .. })
        ));
    }

    #[test]
    fn unrecognized_page_is_a_parse_error() {
        let html = "<html><body>nothing useful here</body></html>";
        assert!(matches!(
            parse_score_page(html, "https://advisories.example/q.htm"),
            Err(AdvisoryError::Parse { .. })
        ));
    }

    #[test]
    fn retry_delays_grow_and_cap_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn jittered_delay_stays_within_bound() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            jitter: Duration::from_millis(50),
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_gate_spaces_consecutive_calls() {
        let gate = RateGate::new(Duration::from_millis(500));
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[test]
    fn title_year_split_handles_missing_year() {
        assert_eq!(
            split_trailing_year("Alien (1979)"),
            ("Alien".to_string(), Some(1979))
        );
        assert_eq!(split_trailing_year("Alien"), ("Alien".to_string(), None));
    }
}
