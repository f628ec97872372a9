//! Resolving records to coordinates through an external geocoding service.
//!
//! Providers are rate limited and will start answering with block pages when pushed too hard, so
//! requests are made one at a time, with a pause before each one. Progress is written to the data
//! file regularly, and a block stops the run after saving what has been done so far.

use crate::{
    models::{Coordinates, Record},
    store::Store,
};
use clap::ValueEnum;
use reqwest::{
    StatusCode,
    header::{HeaderMap, HeaderValue, REFERER},
};
use std::{future::Future, time::Duration};
use tracing::{debug, info, trace, warn};

pub mod google;
pub mod nominatim;

pub use google::Google;
pub use nominatim::Nominatim;

static DEFAULT_LOCALITY: &str = "Portland, OR";
static DEFAULT_USER_AGENT: &str = "BurgerWeekMap/1.0 (contact@example.com)";
static DEFAULT_REFERER: &str = "https://burger-week-map.netlify.app";
static BLOCK_PHRASE: &str = "Access blocked";

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// The provider refuses to serve us, further requests are pointless
    #[error("blocked by geocoding provider: {0}")]
    Blocked(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Response(String),
    #[error("no API key given for provider")]
    MissingKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: String,
}

pub trait Provider {
    /// Stored as the geocoding method of resolved records
    fn name(&self) -> &'static str;

    fn lookup(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<Vec<Candidate>, GeocodeError>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    #[default]
    Openstreetmap,
    Google,
}

#[derive(Debug, Clone)]
pub struct Opts {
    pub provider: ProviderKind,
    /// Override the provider's default API URL
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Appended to every query
    pub locality: String,
    /// Pause before every request
    pub min_interval: Duration,
    /// Save progress after this many processed records
    pub checkpoint_every: usize,
    pub user_agent: String,
    pub referer: Option<String>,
    pub request_timeout: Duration,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            endpoint: None,
            api_key: None,
            locality: DEFAULT_LOCALITY.into(),
            min_interval: Duration::from_secs(1),
            checkpoint_every: 10,
            user_agent: DEFAULT_USER_AGENT.into(),
            referer: Some(DEFAULT_REFERER.into()),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Opts {
    fn build_client(&self) -> Result<reqwest::Client, GeocodeError> {
        let mut headers = HeaderMap::new();
        if let Some(referer) = self.referer.as_deref() {
            match HeaderValue::from_str(referer) {
                Ok(v) => {
                    headers.insert(REFERER, v);
                }
                Err(e) => warn!(err = %e, referer, "Ignoring invalid referer"),
            }
        }
        let mut builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .default_headers(headers);
        if !self.request_timeout.is_zero() {
            builder = builder.timeout(self.request_timeout);
        }
        Ok(builder.build()?)
    }
}

/// Check a provider response for signs of being blocked, and return the body if it looks usable.
pub(crate) async fn read_body(res: reqwest::Response) -> Result<String, GeocodeError> {
    let status = res.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::Blocked(format!("HTTP {status}")));
    }
    let body = res.text().await?;
    if looks_blocked(&body) {
        return Err(GeocodeError::Blocked("got an HTML page instead of data".into()));
    }
    if !status.is_success() {
        return Err(GeocodeError::Response(format!("HTTP {status}")));
    }
    Ok(body)
}

/// Providers answer with an HTML page when they block us
pub fn looks_blocked(body: &str) -> bool {
    body.contains(BLOCK_PHRASE) || body.contains("<html") || body.contains("<!DOCTYPE")
}

/// The provider chosen on the command line
pub enum Backend {
    Nominatim(Nominatim),
    Google(Google),
}

impl Backend {
    pub fn from_opts(opts: &Opts) -> Result<Self, GeocodeError> {
        let client = opts.build_client()?;
        Ok(match opts.provider {
            ProviderKind::Openstreetmap => {
                Self::Nominatim(Nominatim::new(client, opts.endpoint.clone()))
            }
            ProviderKind::Google => Self::Google(Google::new(
                client,
                opts.endpoint.clone(),
                opts.api_key.clone(),
            )?),
        })
    }
}

impl Provider for Backend {
    fn name(&self) -> &'static str {
        match self {
            Self::Nominatim(p) => p.name(),
            Self::Google(p) => p.name(),
        }
    }

    async fn lookup(&self, query: &str) -> Result<Vec<Candidate>, GeocodeError> {
        match self {
            Self::Nominatim(p) => p.lookup(query).await,
            Self::Google(p) => p.lookup(query).await,
        }
    }
}

/// What to send to the provider for a record: the street address if we have one, otherwise the
/// restaurant name, with the neighborhood if known.
pub fn build_query(record: &Record, locality: &str) -> Option<String> {
    let name = record.restaurant_name.trim();
    let neighborhood = record.neighborhood.trim();
    match record.address.as_deref().map(str::trim) {
        Some(addr) if !addr.is_empty() => Some(format!("{addr}, {locality}")),
        _ if !name.is_empty() && !neighborhood.is_empty() => {
            Some(format!("{name}, {neighborhood}, {locality}"))
        }
        _ if !name.is_empty() => Some(format!("{name}, {locality}")),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Stopped early since the provider blocked us
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub processed: usize,
    pub resolved: usize,
    pub outcome: Outcome,
}

pub struct Geocoder<P> {
    provider: P,
    opts: Opts,
}

impl<P: Provider + Sync> Geocoder<P> {
    pub fn new(provider: P, opts: Opts) -> Self {
        Self { provider, opts }
    }

    /// Look up coordinates for a single record. Records that already have coordinates are
    /// returned as is, without asking the provider. Only a block is returned as an error, any
    /// other failure is logged and leaves the record unchanged.
    pub async fn geocode(&self, mut record: Record) -> Result<Record, GeocodeError> {
        if record.has_coordinates() {
            trace!(restaurant = %record.restaurant_name, "Already geocoded, skipping");
            return Ok(record);
        }
        let Some(query) = build_query(&record, &self.opts.locality) else {
            warn!(record = %record, "Nothing to geocode with, skipping");
            return Ok(record);
        };

        if !self.opts.min_interval.is_zero() {
            tokio::time::sleep(self.opts.min_interval).await;
        }
        debug!(query = %query, "Geocoding...");

        match self.provider.lookup(&query).await {
            Ok(candidates) => match candidates.into_iter().next() {
                Some(c) => {
                    debug!(lat = c.latitude, lon = c.longitude, "Found coordinates");
                    record.coordinates = Some(Coordinates {
                        latitude: c.latitude,
                        longitude: c.longitude,
                    });
                    record.geocoded_address = Some(c.formatted_address);
                    record.geocoding_method = Some(self.provider.name().into());
                }
                None => warn!(query = %query, "No geocoding results"),
            },
            Err(e @ GeocodeError::Blocked(_)) => return Err(e),
            Err(e) => warn!(err = %e, query = %query, "Geocoding failed"),
        }
        Ok(record)
    }

    /// Geocode all records in `store` lacking coordinates, saving progress along the way.
    #[tracing::instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn run(&self, store: &Store) -> anyhow::Result<Report> {
        let pending: Vec<Record> = store
            .load()?
            .into_iter()
            .filter(|r| !r.has_coordinates())
            .collect();
        if pending.is_empty() {
            info!("All records already have coordinates");
            return Ok(Report {
                processed: 0,
                resolved: 0,
                outcome: Outcome::Completed,
            });
        }
        info!("{} records need geocoding", pending.len());

        let total = pending.len();
        let checkpoint_every = self.opts.checkpoint_every.max(1);
        let mut processed = Vec::with_capacity(total);
        let mut outcome = Outcome::Completed;

        for (i, record) in pending.into_iter().enumerate() {
            trace!("Processing {}/{}: {}", i + 1, total, record);
            match self.geocode(record).await {
                Ok(r) => processed.push(r),
                Err(e) => {
                    warn!(err = %e, "Provider blocked us, saving progress and stopping");
                    outcome = Outcome::Blocked;
                    break;
                }
            }
            if (i + 1) % checkpoint_every == 0 && i + 1 < total {
                store.update(&processed)?;
                debug!("Saved progress: {}/{} processed", i + 1, total);
            }
        }

        let summary = store.update(&processed)?;
        let report = Report {
            processed: processed.len(),
            resolved: processed.iter().filter(|r| r.has_coordinates()).count(),
            outcome,
        };
        info!(
            resolved = report.resolved,
            processed = report.processed,
            geocoded = summary.geocoded_restaurants,
            total = summary.total_restaurants,
            "Geocoding finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn opts(endpoint: &str) -> Opts {
        Opts {
            endpoint: Some(endpoint.into()),
            min_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn query_priority() {
        let mut r = Record::new("Lardo", "Double", "Southeast");
        r.address = Some(" 1205 SW Washington St ".into());
        assert_eq!(
            Some("1205 SW Washington St, Portland, OR".to_string()),
            build_query(&r, "Portland, OR")
        );

        r.address = Some("  ".into());
        assert_eq!(
            Some("Lardo, Southeast, Portland, OR".to_string()),
            build_query(&r, "Portland, OR")
        );

        r.neighborhood = String::new();
        assert_eq!(
            Some("Lardo, Portland, OR".to_string()),
            build_query(&r, "Portland, OR")
        );

        let r = Record::new(" ", "Double", "Southeast");
        assert_eq!(None, build_query(&r, "Portland, OR"));
    }

    #[test]
    fn block_pages() {
        assert!(looks_blocked("<html><body>Access blocked</body></html>"));
        assert!(looks_blocked("<!DOCTYPE html><p>nope</p>"));
        assert!(looks_blocked("Access blocked."));
        assert!(!looks_blocked(r#"[{"lat":"45.5","lon":"-122.6"}]"#));
    }

    #[test]
    fn google_needs_key() {
        let o = Opts {
            provider: ProviderKind::Google,
            ..Default::default()
        };
        assert!(matches!(
            Backend::from_opts(&o),
            Err(GeocodeError::MissingKey)
        ));
    }

    fn store_with(records: Vec<Record>) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.save(records).unwrap();
        (dir, store)
    }

    fn geocoded(name: &str) -> Record {
        let mut r = Record::new(name, "b", "N");
        r.coordinates = Some(Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        });
        r.geocoding_method = Some("manual".into());
        r
    }

    #[tokio::test]
    async fn block_stops_run_and_keeps_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "B, N, Portland, OR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "lat": "45.5", "lon": "-122.6", "display_name": "B, Portland" }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "C, N, Portland, OR"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body>Access blocked</body></html>"),
            )
            .expect(1)
            .mount(&server)
            .await;
        // neither the already geocoded A nor D after the block may be requested
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let (_dir, store) = store_with(vec![
            geocoded("A"),
            Record::new("B", "b", "N"),
            Record::new("C", "c", "N"),
            Record::new("D", "d", "N"),
        ]);
        let o = opts(&format!("{}/search", server.uri()));
        let geocoder = Geocoder::new(Backend::from_opts(&o).unwrap(), o);
        let report = geocoder.run(&store).await.unwrap();

        assert_eq!(Outcome::Blocked, report.outcome);
        assert_eq!(1, report.processed);
        assert_eq!(1, report.resolved);

        let records = store.load().unwrap();
        assert_eq!(4, records.len());
        assert_eq!(geocoded("A"), records[0]);
        assert_eq!(
            Some(Coordinates {
                latitude: 45.5,
                longitude: -122.6
            }),
            records[1].coordinates
        );
        assert_eq!(Some("openstreetmap"), records[1].geocoding_method.as_deref());
        assert_eq!(Some("B, Portland"), records[1].geocoded_address.as_deref());
        assert!(!records[2].has_coordinates());
        assert!(!records[3].has_coordinates());
    }

    #[tokio::test]
    async fn failures_leave_record_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "A, N, Portland, OR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("q", "B, N, Portland, OR"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let (_dir, store) = store_with(vec![Record::new("A", "a", "N"), Record::new("B", "b", "N")]);
        let o = opts(&server.uri());
        let geocoder = Geocoder::new(Backend::from_opts(&o).unwrap(), o);
        let report = geocoder.run(&store).await.unwrap();

        assert_eq!(Outcome::Completed, report.outcome);
        assert_eq!(2, report.processed);
        assert_eq!(0, report.resolved);
        assert_eq!(
            vec![Record::new("A", "a", "N"), Record::new("B", "b", "N")],
            store.load().unwrap()
        );
    }

    /// Resolves every query, and records how many records had coordinates in the store when
    /// each query came in
    struct Recorder {
        store: Store,
        calls: AtomicUsize,
        seen: Mutex<Vec<usize>>,
    }

    impl Provider for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn lookup(&self, query: &str) -> Result<Vec<Candidate>, GeocodeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let geocoded = self
                .store
                .load()
                .unwrap()
                .iter()
                .filter(|r| r.has_coordinates())
                .count();
            self.seen.lock().unwrap().push(geocoded);
            Ok(vec![Candidate {
                latitude: n as f64,
                longitude: 0.0,
                formatted_address: query.into(),
            }])
        }
    }

    #[tokio::test]
    async fn checkpoints_progress() {
        let records: Vec<Record> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|n| Record::new(n, "b", "N"))
            .collect();
        let (_dir, store) = store_with(records);
        let recorder = Recorder {
            store: store.clone(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        };
        let geocoder = Geocoder::new(
            recorder,
            Opts {
                min_interval: Duration::ZERO,
                checkpoint_every: 2,
                ..Default::default()
            },
        );
        let report = geocoder.run(&store).await.unwrap();

        assert_eq!(Outcome::Completed, report.outcome);
        assert_eq!(5, report.resolved);
        assert_eq!(vec![0, 0, 2, 2, 4], *geocoder.provider.seen.lock().unwrap());
        let records = store.load().unwrap();
        assert!(records.iter().all(|r| r.has_coordinates()));
        assert!(
            records
                .iter()
                .all(|r| r.geocoding_method.as_deref() == Some("recorder"))
        );
    }

    #[tokio::test]
    async fn nothing_to_do() {
        let (_dir, store) = store_with(vec![geocoded("A")]);
        let recorder = Recorder {
            store: store.clone(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        };
        let geocoder = Geocoder::new(recorder, Opts::default());
        let report = geocoder.run(&store).await.unwrap();
        assert_eq!(0, report.processed);
        assert_eq!(0, geocoder.provider.calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_before_each_request() {
        let (_dir, store) = store_with(vec![Record::new("A", "a", "N"), Record::new("B", "b", "N")]);
        let recorder = Recorder {
            store: store.clone(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        };
        let geocoder = Geocoder::new(recorder, Opts::default());
        let start = tokio::time::Instant::now();
        geocoder.run(&store).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
