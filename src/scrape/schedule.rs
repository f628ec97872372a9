use crate::{cache::Client, models::ScheduleEntry, scrape::Endpoints};
use anyhow::Result;
use chrono::Utc;
use http_cache_reqwest::CacheMode;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{ACCEPT, REFERER};
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

static ACCEPT_JSON: &str = "application/json, text/plain, */*";
const SCHEDULE_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    static ref RE_OCCURRENCE: Regex = Regex::new(r"/e(\d+)/?$").unwrap();
}

#[derive(Debug, Default, Deserialize)]
struct ScheduleResponse {
    #[serde(default)]
    results: Vec<ScheduleResult>,
}

#[derive(Debug, Default, Deserialize)]
struct ScheduleResult {
    date_string: Option<String>,
    time_string: Option<String>,
    date: Option<String>,
}

impl From<ScheduleResult> for ScheduleEntry {
    fn from(r: ScheduleResult) -> Self {
        // date_string looks like "Fri Aug 15"
        let date_string = r.date_string.unwrap_or_default();
        let date_string = date_string.trim();
        Self {
            day_of_week: date_string
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .into(),
            date: date_string
                .split_once(' ')
                .map(|(_, rest)| rest.trim())
                .unwrap_or_default()
                .into(),
            hours_text: r.time_string.unwrap_or_default().trim().into(),
            full_date: r.date.unwrap_or_default(),
        }
    }
}

/// The numeric id at the end of a detail page URL, like `.../e12345/`
pub fn occurrence_id(url: &str) -> Option<&str> {
    RE_OCCURRENCE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Get the opening schedule for one event occurrence from the site's JSON API.
pub async fn fetch_schedule(
    client: &Client,
    endpoints: &Endpoints,
    occurrence: &str,
    referer: &str,
) -> Result<Vec<ScheduleEntry>> {
    trace!(occurrence, "Fetching schedule...");
    let cache_buster = Utc::now().timestamp_millis().to_string();
    let page_size = endpoints.page_size.to_string();
    let res: ScheduleResponse = client
        .get(&endpoints.schedule_url)
        .query(&[
            ("market", endpoints.market.as_str()),
            ("page_size", page_size.as_str()),
            ("occurrence", occurrence),
            ("cb", cache_buster.as_str()),
        ])
        .header(REFERER, referer)
        .header(ACCEPT, ACCEPT_JSON)
        .timeout(SCHEDULE_TIMEOUT)
        // every request has a unique cache buster, so there is nothing to reuse
        .with_extension(CacheMode::NoStore)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(res.results.into_iter().map(ScheduleEntry::from).collect())
}
