use super::{Candidate, GeocodeError, Provider, read_body};
use serde::Deserialize;
use tracing::trace;

static DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

/// OpenStreetMap's search API
pub struct Nominatim {
    client: reqwest::Client,
    endpoint: String,
}

// coordinates come as strings
#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

impl Nominatim {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.into()),
        }
    }
}

fn parse(body: &str) -> Result<Vec<Candidate>, GeocodeError> {
    let places: Vec<Place> =
        serde_json::from_str(body).map_err(|e| GeocodeError::Response(e.to_string()))?;
    Ok(places
        .into_iter()
        .filter_map(|p| {
            Some(Candidate {
                latitude: p.lat.trim().parse().ok()?,
                longitude: p.lon.trim().parse().ok()?,
                formatted_address: p.display_name,
            })
        })
        .collect())
}

impl Provider for Nominatim {
    fn name(&self) -> &'static str {
        "openstreetmap"
    }

    async fn lookup(&self, query: &str) -> Result<Vec<Candidate>, GeocodeError> {
        trace!(endpoint = %self.endpoint, query, "Querying Nominatim");
        let res = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?;
        parse(&read_body(res).await?)
    }
}
