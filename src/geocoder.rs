use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};
use url::Url;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geo::{BoundingBox, Coordinates};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: u8,
    pub viewbox: Option<BoundingBox>,
    pub bounded: bool,
    pub country_codes: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 1,
            viewbox: None,
            bounded: false,
            country_codes: None,
        }
    }

    pub fn with_limit(mut self, limit: u8) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn bounded_to(mut self, viewbox: BoundingBox) -> Self {
        self.viewbox = Some(viewbox);
        self.bounded = true;
        self
    }

    pub fn in_country(mut self, country_code: Option<&str>) -> Self {
        self.country_codes = country_code
            .map(|code| code.trim().to_ascii_lowercase())
            .filter(|code| !code.is_empty());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressParts {
    pub city: Option<String>,
    pub town: Option<String>,
    pub village: Option<String>,
    pub municipality: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
}

impl AddressParts {
    /// Most specific settlement name the service reported.
    pub fn locality(&self) -> Option<&str> {
        self.city
            .as_deref()
            .or(self.town.as_deref())
            .or(self.village.as_deref())
            .or(self.municipality.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeCandidate {
    pub coordinates: Coordinates,
    pub display_name: Option<String>,
    pub importance: Option<f64>,
    pub bounding_box: Option<BoundingBox>,
    pub address: AddressParts,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<GeocodeCandidate>>;
}

#[async_trait]
impl<G: Geocoder + ?Sized> Geocoder for Arc<G> {
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<GeocodeCandidate>> {
        (**self).search(request).await
    }
}

/// Client for the Nominatim `/search` endpoint, or any service speaking it.
pub struct NominatimClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl NominatimClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let base_url = Url::parse(&config.geocoder_base_url).map_err(|err| {
            AppError::Config(format!(
                "invalid geocoder base url {}: {err}",
                config.geocoder_base_url
            ))
        })?;
        let http = Client::builder()
            .user_agent(config.geocoder_user_agent.as_str())
            .timeout(Duration::from_millis(config.geocoder_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            api_key: config.geocoder_api_key.clone(),
        })
    }

    fn query_params(&self, request: &SearchRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", request.query.clone()),
            ("format", "jsonv2".to_string()),
            ("addressdetails", "1".to_string()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(viewbox) = &request.viewbox {
            params.push(("viewbox", viewbox.to_viewbox()));
            if request.bounded {
                params.push(("bounded", "1".to_string()));
            }
        }
        if let Some(codes) = &request.country_codes {
            params.push(("countrycodes", codes.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("key", key.expose_secret().to_string()));
        }
        params
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<GeocodeCandidate>> {
        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&self.query_params(request))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::GeocoderStatus {
                status: response.status().as_u16(),
                query: request.query.clone(),
            });
        }

        let places: Vec<RawPlace> = response.json().await?;
        let candidates: Vec<GeocodeCandidate> =
            places.into_iter().filter_map(RawPlace::into_candidate).collect();
        trace!(
            query = %request.query,
            candidates = candidates.len(),
            "geocoder search completed"
        );
        Ok(candidates)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn value(&self) -> Option<f64> {
        match self {
            Numeric::Number(value) => Some(*value),
            Numeric::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlace {
    lat: Numeric,
    lon: Numeric,
    display_name: Option<String>,
    importance: Option<f64>,
    boundingbox: Option<Vec<Numeric>>,
    #[serde(default)]
    address: RawAddress,
}

#[derive(Debug, Default, Deserialize)]
struct RawAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    state: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}

impl RawPlace {
    fn into_candidate(self) -> Option<GeocodeCandidate> {
        let coordinates = Coordinates::new(self.lat.value()?, self.lon.value()?);
        if !coordinates.is_valid() {
            return None;
        }
        let bounding_box = self.boundingbox.and_then(|values| {
            let parsed: Vec<f64> = values.iter().filter_map(Numeric::value).collect();
            <[f64; 4]>::try_from(parsed).ok().map(BoundingBox::from_array)
        });
        Some(GeocodeCandidate {
            coordinates,
            display_name: self.display_name,
            importance: self.importance,
            bounding_box,
            address: AddressParts {
                city: self.address.city,
                town: self.address.town,
                village: self.address.village,
                municipality: self.address.municipality,
                state: self.address.state,
                country: self.address.country,
                country_code: self.address.country_code,
            },
        })
    }
}

/// Admission control for outbound geocoder calls.
#[async_trait]
pub trait RateGate: Send + Sync {
    async fn acquire(&self);
}

/// Enforces a minimum spacing between consecutive request starts.
pub struct IntervalGate {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl IntervalGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_tick: AsyncMutex::new(None),
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[async_trait]
impl RateGate for IntervalGate {
    async fn acquire(&self) {
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

#[async_trait]
impl RateGate for Unthrottled {
    async fn acquire(&self) {}
}

/// Wraps a geocoder with a rate gate and a hard per-call deadline.
pub struct ThrottledGeocoder<G> {
    inner: G,
    gate: Arc<dyn RateGate>,
    deadline: Duration,
}

impl<G: Geocoder> ThrottledGeocoder<G> {
    pub fn new(inner: G, gate: Arc<dyn RateGate>, deadline: Duration) -> Self {
        Self {
            inner,
            gate,
            deadline,
        }
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for ThrottledGeocoder<G> {
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<GeocodeCandidate>> {
        self.gate.acquire().await;
        match timeout(self.deadline, self.inner.search(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(query = %request.query, deadline = ?self.deadline, "geocoder call timed out");
                Err(AppError::Timeout(request.query.clone()))
            }
        }
    }
}

/// Nominatim client behind the configured rate gate and deadline.
pub fn build_geocoder(config: &AppConfig) -> AppResult<Arc<dyn Geocoder>> {
    let client = NominatimClient::new(config)?;
    let gate: Arc<dyn RateGate> = Arc::new(IntervalGate::from_millis(config.geocoder_min_interval_ms));
    Ok(Arc::new(ThrottledGeocoder::new(
        client,
        gate,
        Duration::from_millis(config.geocoder_timeout_ms),
    )))
}
