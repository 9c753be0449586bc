//! Core domain model shared across the CineSift pipeline crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "cinesift-core";

/// First year of cinema accepted by the catalog.
pub const EARLIEST_RELEASE_YEAR: i32 = 1888;
/// Upper bound for announced/in-production titles.
pub const LATEST_RELEASE_YEAR: i32 = 2100;

pub const ADVISORY_SCORE_MIN: i16 = 0;
pub const ADVISORY_SCORE_MAX: i16 = 10;

/// Prefix marking a record created from the advisory source before any
/// authoritative metadata was available. The real metadata identifiers are
/// `tt`-prefixed, so this namespace can never collide with them.
pub const STUB_EXTERNAL_ID_PREFIX: &str = "stub:";

pub const CERTIFICATIONS: [&str; 6] = ["G", "PG", "PG-13", "R", "NC-17", "Not Rated"];

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("release year {0} outside {EARLIEST_RELEASE_YEAR}..={LATEST_RELEASE_YEAR}")]
    YearOutOfRange(i32),
    #[error("advisory score {field}={value} outside {ADVISORY_SCORE_MIN}..={ADVISORY_SCORE_MAX}")]
    ScoreOutOfRange { field: &'static str, value: i16 },
    #[error("match confidence {0} outside 0..=100")]
    ConfidenceOutOfRange(f64),
}

pub fn validate_release_year(year: i32) -> Result<i32, DomainError> {
    if (EARLIEST_RELEASE_YEAR..=LATEST_RELEASE_YEAR).contains(&year) {
        Ok(year)
    } else {
        Err(DomainError::YearOutOfRange(year))
    }
}

pub fn validate_confidence(confidence: f64) -> Result<f64, DomainError> {
    if (0.0..=100.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(DomainError::ConfidenceOutOfRange(confidence))
    }
}

/// Ephemeral matching work item. Built per attempt, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    pub raw_title: String,
    pub year: Option<i32>,
}

impl Title {
    pub fn new(raw_title: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            raw_title: raw_title.into(),
            year,
        }
    }
}

/// Freshly fetched movie metadata, parsed at the fetch boundary before the
/// matcher or engine ever see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MovieDraft {
    pub external_id: String,
    pub title: String,
    pub year: i32,
    pub runtime_minutes: Option<i32>,
    pub genres: Vec<String>,
    pub certification: Option<String>,
    pub plot: Option<String>,
    pub director: Option<String>,
    pub cast: Vec<String>,
    pub poster_url: Option<String>,
    pub audience_rating: Option<f64>,
    pub critics_rating: Option<i32>,
    pub metascore: Option<i32>,
    pub awards_summary: Option<String>,
    pub awards_won: i32,
    pub award_nominations: i32,
}

/// Canonical persisted movie entity. `year` is absent only on stub records
/// whose advisory listing carried no year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub runtime_minutes: Option<i32>,
    pub genres: Vec<String>,
    pub certification: Option<String>,
    pub plot: Option<String>,
    pub director: Option<String>,
    pub cast: Vec<String>,
    pub poster_url: Option<String>,
    pub audience_rating: Option<f64>,
    pub critics_rating: Option<i32>,
    pub metascore: Option<i32>,
    pub awards_summary: Option<String>,
    pub awards_won: i32,
    pub award_nominations: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MovieRecord {
    /// Stub records still await enrichment from the metadata source.
    pub fn is_stub(&self) -> bool {
        self.external_id.starts_with(STUB_EXTERNAL_ID_PREFIX)
    }

    pub fn title_item(&self) -> Title {
        Title::new(self.title.clone(), self.year)
    }
}

/// Deterministic placeholder identifier for a stub record, derived from the
/// normalized title and scraped year so re-ingesting the same listing
/// converges on the same external id.
pub fn stub_external_id(normalized_title: &str, year: Option<i32>) -> String {
    let seed = match year {
        Some(y) => format!("{normalized_title}|{y}"),
        None => format!("{normalized_title}|"),
    };
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
    format!("{STUB_EXTERNAL_ID_PREFIX}{id}")
}

/// Three-axis content advisory sub-scores, each bounded to 0..=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryScores {
    pub sex_nudity: i16,
    pub violence_gore: i16,
    pub profanity: i16,
}

impl AdvisoryScores {
    pub fn validated(self) -> Result<Self, DomainError> {
        for (field, value) in [
            ("sex_nudity", self.sex_nudity),
            ("violence_gore", self.violence_gore),
            ("profanity", self.profanity),
        ] {
            if !(ADVISORY_SCORE_MIN..=ADVISORY_SCORE_MAX).contains(&value) {
                return Err(DomainError::ScoreOutOfRange { field, value });
            }
        }
        Ok(self)
    }
}

/// Persisted advisory row, one-to-one with its parent movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryRecord {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub scores: AdvisoryScores,
    pub source: String,
    pub match_confidence: Option<f64>,
    pub manually_reviewed: bool,
    pub scraped_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Metadata,
    Advisory,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Metadata => "metadata",
            SourceTag::Advisory => "advisory",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub fetched: u32,
    pub created: u32,
    pub updated: u32,
    pub failed: u32,
}

/// One per-item failure, with enough context to locate the offending item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub item: String,
    pub kind: String,
    pub message: String,
}

impl RunError {
    pub fn new(
        item: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item: item.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Audit record for one pipeline run. Appended once on completion, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub id: Uuid,
    pub source: SourceTag,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub errors: Vec<RunError>,
    pub remaining: Option<u64>,
    pub duration_seconds: i64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

/// Review-queue row for a borderline match awaiting human triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub movie_id: Uuid,
    pub scraped_title: String,
    pub scraped_year: Option<i32>,
    pub confidence: f64,
    pub locator: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_validation_bounds() {
        assert!(validate_release_year(1888).is_ok());
        assert!(validate_release_year(2100).is_ok());
        assert!(validate_release_year(1887).is_err());
        assert!(validate_release_year(2101).is_err());
    }

    #[test]
    fn confidence_validation_bounds() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(100.0).is_ok());
        assert!(validate_confidence(100.01).is_err());
        assert!(validate_confidence(-0.01).is_err());
    }

    #[test]
    fn advisory_scores_reject_out_of_range() {
        let ok = AdvisoryScores {
            sex_nudity: 0,
            violence_gore: 10,
            profanity: 5,
        };
        assert!(ok.validated().is_ok());

        let bad = AdvisoryScores {
            sex_nudity: 11,
            ..ok
        };
        assert!(bad.validated().is_err());
        let negative = AdvisoryScores {
            profanity: -1,
            ..ok
        };
        assert!(negative.validated().is_err());
    }

    #[test]
    fn stub_ids_are_deterministic_and_prefixed() {
        let a = stub_external_id("night watch", Some(2004));
        let b = stub_external_id("night watch", Some(2004));
        let c = stub_external_id("night watch", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(STUB_EXTERNAL_ID_PREFIX));
        assert!(!a.starts_with("tt"));
    }

    #[test]
    fn stub_detection_by_prefix() {
        let now = Utc::now();
        let mut record = MovieRecord {
            id: Uuid::new_v4(),
            external_id: stub_external_id("some title", Some(1999)),
            title: "Some Title".into(),
            year: Some(1999),
            runtime_minutes: None,
            genres: vec![],
            certification: None,
            plot: None,
            director: None,
            cast: vec![],
            poster_url: None,
            audience_rating: None,
            critics_rating: None,
            metascore: None,
            awards_summary: None,
            awards_won: 0,
            award_nominations: 0,
            created_at: now,
            updated_at: now,
        };
        assert!(record.is_stub());
        record.external_id = "tt0133093".into();
        assert!(!record.is_stub());
    }
}
