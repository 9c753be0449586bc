//! Postgres-backed catalog store and the `Catalog` port the reconciliation
//! engine writes through.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use cinesift_core::{
    AdvisoryScores, MovieDraft, MovieRecord, ReviewEntry, RunReport, UpsertOutcome,
    STUB_EXTERNAL_ID_PREFIX,
};

pub const CRATE_NAME: &str = "cinesift-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage port consumed by the reconciliation engine. Movie and advisory
/// writes happen inside the phase transaction opened by `begin`; run reports
/// are appended outside it so a rolled-back run still leaves its audit row.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn begin(&self) -> Result<(), StoreError>;
    async fn commit(&self) -> Result<(), StoreError>;
    async fn rollback(&self) -> Result<(), StoreError>;

    async fn find_movie_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<MovieRecord>, StoreError>;
    async fn find_movie_by_title_year(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<MovieRecord>, StoreError>;
    async fn upsert_movie(
        &self,
        draft: &MovieDraft,
    ) -> Result<(MovieRecord, UpsertOutcome), StoreError>;
    async fn insert_stub(
        &self,
        external_id: &str,
        title: &str,
        year: Option<i32>,
    ) -> Result<MovieRecord, StoreError>;
    async fn promote_stub(&self, movie_id: Uuid, draft: &MovieDraft) -> Result<(), StoreError>;
    async fn placeholder_movies(&self) -> Result<Vec<MovieRecord>, StoreError>;
    async fn movies_missing_advisory(&self) -> Result<Vec<MovieRecord>, StoreError>;

    async fn upsert_advisory(
        &self,
        movie_id: Uuid,
        scores: AdvisoryScores,
        confidence: Option<f64>,
    ) -> Result<UpsertOutcome, StoreError>;
    async fn enqueue_review(&self, entry: &ReviewEntry) -> Result<(), StoreError>;

    async fn append_run_report(&self, report: &RunReport) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: Catalog + ?Sized> Catalog for std::sync::Arc<T> {
    async fn begin(&self) -> Result<(), StoreError> {
        (**self).begin().await
    }

    async fn commit(&self) -> Result<(), StoreError> {
        (**self).commit().await
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        (**self).rollback().await
    }

    async fn find_movie_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<MovieRecord>, StoreError> {
        (**self).find_movie_by_external_id(external_id).await
    }

    async fn find_movie_by_title_year(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<MovieRecord>, StoreError> {
        (**self).find_movie_by_title_year(title, year).await
    }

    async fn upsert_movie(
        &self,
        draft: &MovieDraft,
    ) -> Result<(MovieRecord, UpsertOutcome), StoreError> {
        (**self).upsert_movie(draft).await
    }

    async fn insert_stub(
        &self,
        external_id: &str,
        title: &str,
        year: Option<i32>,
    ) -> Result<MovieRecord, StoreError> {
        (**self).insert_stub(external_id, title, year).await
    }

    async fn promote_stub(&self, movie_id: Uuid, draft: &MovieDraft) -> Result<(), StoreError> {
        (**self).promote_stub(movie_id, draft).await
    }

    async fn placeholder_movies(&self) -> Result<Vec<MovieRecord>, StoreError> {
        (**self).placeholder_movies().await
    }

    async fn movies_missing_advisory(&self) -> Result<Vec<MovieRecord>, StoreError> {
        (**self).movies_missing_advisory().await
    }

    async fn upsert_advisory(
        &self,
        movie_id: Uuid,
        scores: AdvisoryScores,
        confidence: Option<f64>,
    ) -> Result<UpsertOutcome, StoreError> {
        (**self).upsert_advisory(movie_id, scores, confidence).await
    }

    async fn enqueue_review(&self, entry: &ReviewEntry) -> Result<(), StoreError> {
        (**self).enqueue_review(entry).await
    }

    async fn append_run_report(&self, report: &RunReport) -> Result<(), StoreError> {
        (**self).append_run_report(report).await
    }
}

pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// `Catalog` over a Postgres pool. While a phase transaction is open every
/// movie/advisory statement runs inside it; otherwise statements autocommit.
pub struct PgCatalog {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const MOVIE_COLUMNS: &str = "id, external_id, title, year, runtime_minutes, genres, \
     certification, plot, director, cast_members, poster_url, audience_rating, \
     critics_rating, metascore, awards_summary, awards_won, award_nominations, \
     created_at, updated_at";

fn movie_from_row(row: &PgRow) -> Result<MovieRecord, sqlx::Error> {
    Ok(MovieRecord {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        runtime_minutes: row.try_get("runtime_minutes")?,
        genres: row.try_get("genres")?,
        certification: row.try_get("certification")?,
        plot: row.try_get("plot")?,
        director: row.try_get("director")?,
        cast: row.try_get("cast_members")?,
        poster_url: row.try_get("poster_url")?,
        audience_rating: row.try_get("audience_rating")?,
        critics_rating: row.try_get("critics_rating")?,
        metascore: row.try_get("metascore")?,
        awards_summary: row.try_get("awards_summary")?,
        awards_won: row.try_get("awards_won")?,
        award_nominations: row.try_get("award_nominations")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

macro_rules! run_query {
    ($catalog:expr, $query:expr, $method:ident) => {{
        let catalog = $catalog;
        let mut guard = catalog.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => $query.$method(&mut **tx).await,
            None => $query.$method(&catalog.pool).await,
        }
    }};
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn begin(&self) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
        }
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn find_movie_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<MovieRecord>, StoreError> {
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE external_id = $1");
        let query = sqlx::query(&sql).bind(external_id);
        let row = run_query!(self, query, fetch_optional)?;
        Ok(row.as_ref().map(movie_from_row).transpose()?)
    }

    async fn find_movie_by_title_year(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<MovieRecord>, StoreError> {
        let sql = format!(
            "SELECT {MOVIE_COLUMNS} FROM movies \
             WHERE lower(title) = lower($1) AND year IS NOT DISTINCT FROM $2 \
             ORDER BY created_at LIMIT 1"
        );
        let query = sqlx::query(&sql).bind(title).bind(year);
        let row = run_query!(self, query, fetch_optional)?;
        Ok(row.as_ref().map(movie_from_row).transpose()?)
    }

    async fn upsert_movie(
        &self,
        draft: &MovieDraft,
    ) -> Result<(MovieRecord, UpsertOutcome), StoreError> {
        let existing = self.find_movie_by_external_id(&draft.external_id).await?;

        let (sql, outcome) = match existing {
            Some(_) => (
                format!(
                    "UPDATE movies SET title = $2, year = $3, runtime_minutes = $4, \
                     genres = $5, certification = $6, plot = $7, director = $8, \
                     cast_members = $9, poster_url = $10, audience_rating = $11, \
                     critics_rating = $12, metascore = $13, awards_summary = $14, \
                     awards_won = $15, award_nominations = $16, updated_at = now() \
                     WHERE external_id = $1 RETURNING {MOVIE_COLUMNS}"
                ),
                UpsertOutcome::Updated,
            ),
            None => (
                format!(
                    "INSERT INTO movies (id, external_id, title, year, runtime_minutes, \
                     genres, certification, plot, director, cast_members, poster_url, \
                     audience_rating, critics_rating, metascore, awards_summary, \
                     awards_won, award_nominations) \
                     VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                     $11, $12, $13, $14, $15, $16) RETURNING {MOVIE_COLUMNS}"
                ),
                UpsertOutcome::Created,
            ),
        };

        let query = sqlx::query(&sql)
            .bind(&draft.external_id)
            .bind(&draft.title)
            .bind(draft.year)
            .bind(draft.runtime_minutes)
            .bind(&draft.genres)
            .bind(&draft.certification)
            .bind(&draft.plot)
            .bind(&draft.director)
            .bind(&draft.cast)
            .bind(&draft.poster_url)
            .bind(draft.audience_rating)
            .bind(draft.critics_rating)
            .bind(draft.metascore)
            .bind(&draft.awards_summary)
            .bind(draft.awards_won)
            .bind(draft.award_nominations);
        let row = run_query!(self, query, fetch_one)?;
        Ok((movie_from_row(&row)?, outcome))
    }

    async fn insert_stub(
        &self,
        external_id: &str,
        title: &str,
        year: Option<i32>,
    ) -> Result<MovieRecord, StoreError> {
        debug!(external_id, title, "inserting stub movie record");
        let sql = format!(
            "INSERT INTO movies (id, external_id, title, year) \
             VALUES (gen_random_uuid(), $1, $2, $3) RETURNING {MOVIE_COLUMNS}"
        );
        let query = sqlx::query(&sql).bind(external_id).bind(title).bind(year);
        let row = run_query!(self, query, fetch_one)?;
        Ok(movie_from_row(&row)?)
    }

    async fn promote_stub(&self, movie_id: Uuid, draft: &MovieDraft) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE movies SET external_id = $2, title = $3, year = $4, \
             runtime_minutes = $5, genres = $6, certification = $7, plot = $8, \
             director = $9, cast_members = $10, poster_url = $11, audience_rating = $12, \
             critics_rating = $13, metascore = $14, awards_summary = $15, \
             awards_won = $16, award_nominations = $17, updated_at = now() \
             WHERE id = $1",
        )
        .bind(movie_id)
        .bind(&draft.external_id)
        .bind(&draft.title)
        .bind(draft.year)
        .bind(draft.runtime_minutes)
        .bind(&draft.genres)
        .bind(&draft.certification)
        .bind(&draft.plot)
        .bind(&draft.director)
        .bind(&draft.cast)
        .bind(&draft.poster_url)
        .bind(draft.audience_rating)
        .bind(draft.critics_rating)
        .bind(draft.metascore)
        .bind(&draft.awards_summary)
        .bind(draft.awards_won)
        .bind(draft.award_nominations);
        run_query!(self, query, execute)?;
        Ok(())
    }

    async fn placeholder_movies(&self) -> Result<Vec<MovieRecord>, StoreError> {
        let sql = format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE external_id LIKE $1 \
             ORDER BY created_at, id"
        );
        let query = sqlx::query(&sql).bind(format!("{STUB_EXTERNAL_ID_PREFIX}%"));
        let rows = run_query!(self, query, fetch_all)?;
        rows.iter()
            .map(|row| movie_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn movies_missing_advisory(&self) -> Result<Vec<MovieRecord>, StoreError> {
        let sql = format!(
            "SELECT {MOVIE_COLUMNS} FROM movies m \
             WHERE NOT EXISTS (SELECT 1 FROM advisory_scores a WHERE a.movie_id = m.id) \
             ORDER BY m.created_at, m.id"
        );
        let query = sqlx::query(&sql);
        let rows = run_query!(self, query, fetch_all)?;
        rows.iter()
            .map(|row| movie_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn upsert_advisory(
        &self,
        movie_id: Uuid,
        scores: AdvisoryScores,
        confidence: Option<f64>,
    ) -> Result<UpsertOutcome, StoreError> {
        let select = sqlx::query("SELECT id FROM advisory_scores WHERE movie_id = $1").bind(movie_id);
        let existing = run_query!(self, select, fetch_optional)?;

        match existing {
            Some(_) => {
                // Automatic refresh never touches the manual-review flag.
                let query = sqlx::query(
                    "UPDATE advisory_scores SET sex_nudity = $2, violence_gore = $3, \
                     profanity = $4, match_confidence = $5, scraped_at = now(), \
                     updated_at = now() WHERE movie_id = $1",
                )
                .bind(movie_id)
                .bind(scores.sex_nudity)
                .bind(scores.violence_gore)
                .bind(scores.profanity)
                .bind(confidence);
                run_query!(self, query, execute)?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let query = sqlx::query(
                    "INSERT INTO advisory_scores (id, movie_id, sex_nudity, violence_gore, \
                     profanity, match_confidence, manually_reviewed) \
                     VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, FALSE)",
                )
                .bind(movie_id)
                .bind(scores.sex_nudity)
                .bind(scores.violence_gore)
                .bind(scores.profanity)
                .bind(confidence);
                run_query!(self, query, execute)?;
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn enqueue_review(&self, entry: &ReviewEntry) -> Result<(), StoreError> {
        let select = sqlx::query(
            "SELECT id FROM review_queue WHERE movie_id = $1 AND status = 'pending'",
        )
        .bind(entry.movie_id);
        if run_query!(self, select, fetch_optional)?.is_some() {
            return Ok(());
        }

        let query = sqlx::query(
            "INSERT INTO review_queue (id, movie_id, scraped_title, scraped_year, \
             confidence, locator, status) \
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, 'pending')",
        )
        .bind(entry.movie_id)
        .bind(&entry.scraped_title)
        .bind(entry.scraped_year)
        .bind(entry.confidence)
        .bind(&entry.locator);
        run_query!(self, query, execute)?;
        Ok(())
    }

    async fn append_run_report(&self, report: &RunReport) -> Result<(), StoreError> {
        // Always on the pool: a failed run's report must survive the rollback.
        sqlx::query(
            "INSERT INTO run_reports (id, source, status, records_fetched, records_created, \
             records_updated, records_failed, errors, remaining, duration_seconds, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(report.id)
        .bind(report.source.as_str())
        .bind(report.status.as_str())
        .bind(report.counters.fetched as i32)
        .bind(report.counters.created as i32)
        .bind(report.counters.updated as i32)
        .bind(report.counters.failed as i32)
        .bind(serde_json::to_value(&report.errors).unwrap_or_default())
        .bind(report.remaining.map(|r| r as i64))
        .bind(report.duration_seconds)
        .bind(report.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
