// Each stage loads the data file, does its work and writes the result back, so stages can be run
// on their own from the command line, or all in sequence, optionally on a schedule.

use crate::{
    batch::Batcher,
    cache::Client,
    geocode::{self, Backend, Geocoder, Outcome},
    images::ImageEnricher,
    merge,
    models::{Record, Summary},
    scrape::{Endpoints, Enricher, details::DetailEnricher, listing},
    signals,
    store::Store,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

const DETAILS_BATCH_WIDTH: usize = 5;
const IMAGES_BATCH_WIDTH: usize = 3;
const BATCH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Paths {
    /// Where burgers.json and summary.json live
    pub data_dir: PathBuf,
    /// Where downloaded images are stored
    pub images_dir: PathBuf,
}

pub struct Pipeline {
    client: Client,
    endpoints: Endpoints,
    store: Store,
    images_dir: PathBuf,
    geocode: geocode::Opts,
    details_batch: Batcher,
    images_batch: Batcher,
    running: Mutex<()>,
}

impl Pipeline {
    pub fn new(client: Client, endpoints: Endpoints, paths: Paths, geocode: geocode::Opts) -> Self {
        Self {
            client,
            endpoints,
            store: Store::new(&paths.data_dir),
            images_dir: paths.images_dir,
            geocode,
            details_batch: Batcher::new(DETAILS_BATCH_WIDTH, BATCH_DELAY),
            images_batch: Batcher::new(IMAGES_BATCH_WIDTH, BATCH_DELAY),
            running: Mutex::new(()),
        }
    }

    /// Replace the batch settings of the details and images stages
    pub fn with_batchers(mut self, details: Batcher, images: Batcher) -> Self {
        self.details_batch = details;
        self.images_batch = images;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Scrape listings and details, and save them merged with what we had before. If the
    /// listings page gives nothing, the existing data is left alone and `None` is returned.
    #[tracing::instrument(skip_all)]
    pub async fn scrape(&self) -> Result<Option<Summary>> {
        let listing = listing::scrape_listing(&self.client, &self.endpoints).await;
        if listing.is_empty() {
            warn!("No restaurants found, keeping existing data");
            return Ok(None);
        }

        let enricher = DetailEnricher::new(self.client.clone(), self.endpoints.clone());
        info!(
            stage = enricher.name(),
            "Scraping details for {} restaurants",
            listing.len()
        );
        let enricher = &enricher;
        let detailed = self
            .details_batch
            .run(listing, move |r| enricher.enrich(r))
            .await;

        let prior = self.store.load_or_empty();
        debug!("Merging with {} existing records", prior.len());
        let merged = merge::merge_images(merge::merge_coordinates(detailed, &prior), &prior);
        let summary = self.store.save(merged)?;
        info!(
            total = summary.total_restaurants,
            with_addresses = summary.with_addresses,
            geocoded = summary.geocoded_restaurants,
            "Scraping complete"
        );
        Ok(Some(summary))
    }

    #[tracing::instrument(skip_all)]
    pub async fn geocode(&self) -> Result<geocode::Report> {
        let backend = Backend::from_opts(&self.geocode)?;
        let report = Geocoder::new(backend, self.geocode.clone())
            .run(&self.store)
            .await?;
        if report.outcome == Outcome::Blocked {
            warn!("Geocoding was blocked by the provider, run again later to continue");
        }
        Ok(report)
    }

    #[tracing::instrument(skip_all)]
    pub async fn images(&self) -> Result<Summary> {
        let pending: Vec<Record> = self
            .store
            .load()?
            .into_iter()
            .filter(ImageEnricher::wants)
            .collect();
        if pending.is_empty() {
            info!("No records need images");
        }
        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .with_context(|| format!("failed to create {}", self.images_dir.display()))?;

        let enricher = ImageEnricher::new(self.client.clone(), self.images_dir.clone());
        let enricher = &enricher;
        let done = self
            .images_batch
            .run(pending, move |r| enricher.enrich(r))
            .await;

        let summary = self.store.update(&done)?;
        info!(
            downloaded = done.iter().filter(|r| r.image.is_some()).count(),
            attempted = done.len(),
            "Image scraping complete"
        );
        Ok(summary)
    }

    /// All stages in sequence
    pub async fn run_all(&self) -> Result<()> {
        self.scrape().await?;
        self.geocode().await?;
        self.images().await?;
        Ok(())
    }

    /// Like [`Pipeline::run_all`], but does nothing if a run is already in progress. Returns
    /// whether a run was made.
    pub async fn run_exclusive(&self) -> Result<bool> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous run still in progress, skipping");
            return Ok(false);
        };
        self.run_all().await?;
        Ok(true)
    }

    /// Run all stages on the given cron schedule until the process is told to stop
    pub async fn run_scheduled(self: Arc<Self>, cron: &str) -> Result<()> {
        let sched = JobScheduler::new()
            .await
            .context("failed to create scheduler")?;

        let pipeline = self.clone();
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                if let Err(e) = pipeline.run_exclusive().await {
                    error!(err = %e, "Scheduled run failed");
                }
            })
        })
        .with_context(|| format!("invalid cron spec: {cron}"))?;
        sched.add(job).await.context("failed to add job")?;

        let mut sched = sched;
        sched.start().await.context("failed to start scheduler")?;
        info!(cron, "Scheduler started");

        signals::shutdown_signal().await?;
        sched.shutdown().await.context("failed to stop scheduler")?;
        Ok(())
    }
}
