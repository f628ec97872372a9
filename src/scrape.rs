use crate::models::Record;
use anyhow::Result;
use scraper::Html;
use std::future::Future;

pub mod details;
pub mod listing;
pub mod schedule;

static ORIGIN: &str = "https://everout.com";
static LISTING_PATH: &str = "/portland/events/the-portland-mercurys-burger-week-2025/e205791/";
static SCHEDULE_PATH: &str = "/api/schedule-dates/";

/// Where to find things on the event site
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Relative links on the site are resolved against this
    pub origin: String,
    pub listing_url: String,
    pub schedule_url: String,
    pub market: String,
    pub page_size: u32,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::with_origin(ORIGIN)
    }
}

impl Endpoints {
    /// The default site layout, served from `origin`
    pub fn with_origin(origin: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        Self {
            origin: origin.into(),
            listing_url: format!("{origin}{LISTING_PATH}"),
            schedule_url: format!("{origin}{SCHEDULE_PATH}"),
            market: "portland".into(),
            page_size: 15,
        }
    }
}

/// A fetched HTML document, keeping the raw source around for the extractors that work on text
/// rather than on the DOM.
pub struct Page {
    pub url: String,
    pub raw: String,
    pub doc: Html,
}

impl Page {
    pub fn parse(url: &str, raw: String) -> Self {
        Self {
            url: url.into(),
            doc: Html::parse_document(&raw),
            raw,
        }
    }
}

/// One enrichment step applied to every record, under the batch orchestrator.
///
/// An error means the record is kept as it was before the step.
pub trait Enricher {
    fn name(&self) -> &'static str;

    fn enrich(&self, record: Record) -> impl Future<Output = Result<Record>> + Send;
}
