use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cinesift_adapters::{AdvisoryScraper, MetadataClient};
use cinesift_core::{AdvisoryScores, MovieDraft};
use cinesift_storage::{connect, run_migrations, Catalog, PgCatalog};
use cinesift_sync::{build_scheduler, load_watchlist, ReconcileEngine, RefreshTick, SyncConfig};

type Engine = ReconcileEngine<MetadataClient, AdvisoryScraper, Arc<PgCatalog>>;

#[derive(Debug, Parser)]
#[command(name = "cinesift")]
#[command(about = "CineSift catalog pipeline and query API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending database migrations.
    Migrate,
    /// Load a small sample catalog for local development.
    Seed,
    /// Refresh metadata for the watchlist (or explicit --ids).
    RefreshMetadata {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Scrape advisory listings and reconcile them into the catalog.
    RefreshAdvisories,
    /// Enrich placeholder records with authoritative metadata.
    Enrich,
    /// Full cycle: metadata refresh, advisory refresh, enrichment.
    Refresh,
    /// Serve the query API.
    Serve,
    /// Run the cron-driven refresh loop.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Refresh) {
        Commands::Migrate => {
            let pool = connect(&config.database_url).await?;
            run_migrations(&pool).await?;
            info!("migrations applied");
        }
        Commands::Seed => seed(&config).await?,
        Commands::RefreshMetadata { ids } => {
            let engine = build_engine(&config).await?;
            let ids = if ids.is_empty() {
                load_watchlist(&config.watchlist_path)?
            } else {
                ids
            };
            let report = engine.refresh_metadata(&ids).await?;
            info!(
                status = report.status.as_str(),
                fetched = report.counters.fetched,
                created = report.counters.created,
                updated = report.counters.updated,
                failed = report.counters.failed,
                "metadata refresh finished"
            );
        }
        Commands::RefreshAdvisories => {
            let engine = build_engine(&config).await?;
            let report = engine.refresh_advisories().await?;
            info!(
                status = report.status.as_str(),
                fetched = report.counters.fetched,
                "advisory refresh finished"
            );
        }
        Commands::Enrich => {
            let engine = build_engine(&config).await?;
            let report = engine.enrich_stubs().await?;
            info!(
                status = report.status.as_str(),
                enriched = report.counters.updated,
                remaining = report.remaining,
                "enrichment pass finished"
            );
        }
        Commands::Refresh => {
            let engine = build_engine(&config).await?;
            run_cycle(&engine, &config).await?;
        }
        Commands::Serve => {
            let pool = connect(&config.database_url).await?;
            run_migrations(&pool).await?;
            let port: u16 = std::env::var("CINESIFT_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000);
            info!(port, "serving query API");
            cinesift_web::serve(pool, port).await?;
        }
        Commands::Schedule => schedule(&config).await?,
    }

    Ok(())
}

async fn build_engine(config: &SyncConfig) -> Result<Engine> {
    let pool = connect(&config.database_url).await?;
    let catalog = Arc::new(PgCatalog::new(pool));
    let metadata = MetadataClient::new(config.metadata_client_config())?;
    let advisory = AdvisoryScraper::new(config.advisory_scraper_config())?;
    Ok(ReconcileEngine::new(metadata, advisory, catalog)
        .with_listing_pages(config.listing_pages)
        .with_enrich_batch_size(config.enrich_batch_size))
}

async fn run_cycle(engine: &Engine, config: &SyncConfig) -> Result<()> {
    let ids = load_watchlist(&config.watchlist_path)?;
    engine.refresh_metadata(&ids).await?;
    engine.refresh_advisories().await?;
    engine.enrich_stubs().await?;
    Ok(())
}

async fn schedule(config: &SyncConfig) -> Result<()> {
    let engine = build_engine(config).await?;
    let (sender, mut receiver) = tokio::sync::mpsc::channel(8);
    let Some(sched) = build_scheduler(config, sender).await? else {
        warn!("scheduler disabled; set CINESIFT_SCHEDULER_ENABLED=1 to enable it");
        return Ok(());
    };
    sched.start().await.context("starting scheduler")?;
    info!("scheduler started, waiting for refresh ticks");

    while let Some(tick) = receiver.recv().await {
        let result: Result<()> = match tick {
            RefreshTick::Metadata => match load_watchlist(&config.watchlist_path) {
                Ok(ids) => engine.refresh_metadata(&ids).await.map(|_| ()).map_err(Into::into),
                Err(err) => Err(err),
            },
            RefreshTick::Advisory => match engine.refresh_advisories().await {
                Ok(_) => engine.enrich_stubs().await.map(|_| ()).map_err(Into::into),
                Err(err) => Err(err.into()),
            },
        };
        if let Err(err) = result {
            warn!(error = %err, "scheduled refresh failed; next tick will retry");
        }
    }
    Ok(())
}

async fn seed(config: &SyncConfig) -> Result<()> {
    let pool = connect(&config.database_url).await?;
    run_migrations(&pool).await?;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies")
        .fetch_one(&pool)
        .await?;
    if count > 0 {
        info!(count, "catalog already populated, skipping seed");
        return Ok(());
    }

    let catalog = PgCatalog::new(pool);
    for (draft, scores) in sample_catalog() {
        let (record, _) = catalog.upsert_movie(&draft).await?;
        catalog
            .upsert_advisory(record.id, scores, Some(95.0))
            .await?;
        info!(title = %record.title, "seeded");
    }
    info!("seed complete");
    Ok(())
}

fn sample_catalog() -> Vec<(MovieDraft, AdvisoryScores)> {
    fn entry(
        external_id: &str,
        title: &str,
        year: i32,
        runtime: i32,
        genres: &[&str],
        certification: &str,
        director: &str,
        audience: f64,
        critics: i32,
        scores: (i16, i16, i16),
    ) -> (MovieDraft, AdvisoryScores) {
        (
            MovieDraft {
                external_id: external_id.to_string(),
                title: title.to_string(),
                year,
                runtime_minutes: Some(runtime),
                genres: genres.iter().map(|g| g.to_string()).collect(),
                certification: Some(certification.to_string()),
                director: Some(director.to_string()),
                audience_rating: Some(audience),
                critics_rating: Some(critics),
                ..MovieDraft::default()
            },
            AdvisoryScores {
                sex_nudity: scores.0,
                violence_gore: scores.1,
                profanity: scores.2,
            },
        )
    }

    vec![
        entry(
            "tt0133093",
            "The Matrix",
            1999,
            136,
            &["Action", "Sci-Fi"],
            "R",
            "Lana Wachowski, Lilly Wachowski",
            8.7,
            87,
            (3, 8, 5),
        ),
        entry(
            "tt0266543",
            "Finding Nemo",
            2003,
            100,
            &["Animation", "Adventure", "Family"],
            "G",
            "Andrew Stanton",
            8.1,
            99,
            (0, 2, 0),
        ),
        entry(
            "tt0468569",
            "The Dark Knight",
            2008,
            152,
            &["Action", "Crime", "Drama"],
            "PG-13",
            "Christopher Nolan",
            9.0,
            94,
            (2, 7, 4),
        ),
        entry(
            "tt0114709",
            "Toy Story",
            1995,
            81,
            &["Animation", "Comedy", "Family"],
            "G",
            "John Lasseter",
            8.3,
            100,
            (0, 1, 1),
        ),
        entry(
            "tt0113277",
            "Heat",
            1995,
            170,
            &["Action", "Crime", "Drama"],
            "R",
            "Michael Mann",
            8.3,
            88,
            (4, 8, 9),
        ),
    ]
}
