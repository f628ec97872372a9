use super::{Candidate, GeocodeError, Provider, read_body};
use serde::Deserialize;
use tracing::trace;

static DEFAULT_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Google Geocoding API, needs an API key
pub struct Google {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    formatted_address: String,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

impl Google {
    pub fn new(
        client: reqwest::Client,
        endpoint: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, GeocodeError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(GeocodeError::MissingKey)?;
        Ok(Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.into()),
            api_key,
        })
    }
}

fn parse(body: &str) -> Result<Vec<Candidate>, GeocodeError> {
    let res: Response =
        serde_json::from_str(body).map_err(|e| GeocodeError::Response(e.to_string()))?;
    let reason = || {
        format!(
            "{}: {}",
            res.status,
            res.error_message.as_deref().unwrap_or("no message")
        )
    };
    match res.status.as_str() {
        "OK" => Ok(res
            .results
            .iter()
            .map(|r| Candidate {
                latitude: r.geometry.location.lat,
                longitude: r.geometry.location.lng,
                formatted_address: r.formatted_address.clone(),
            })
            .collect()),
        "ZERO_RESULTS" => Ok(Vec::new()),
        "OVER_QUERY_LIMIT" | "REQUEST_DENIED" => Err(GeocodeError::Blocked(reason())),
        _ => Err(GeocodeError::Response(reason())),
    }
}

impl Provider for Google {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn lookup(&self, query: &str) -> Result<Vec<Candidate>, GeocodeError> {
        trace!(endpoint = %self.endpoint, query, "Querying Google");
        let res = self
            .client
            .get(&self.endpoint)
            .query(&[("address", query), ("key", self.api_key.as_str())])
            .send()
            .await?;
        parse(&read_body(res).await?)
    }
}
