use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::errors::{AppError, AppResult};
use crate::geo::{BoundingBox, CityGeoResult, Coordinates};
use crate::geocoder::{AddressParts, GeocodeCandidate, Geocoder, SearchRequest};

/// Answers searches from a fixed query table and records every request.
#[derive(Default)]
pub struct ScriptedGeocoder {
    responses: Mutex<HashMap<String, Vec<GeocodeCandidate>>>,
    failures: Mutex<HashSet<String>>,
    requests: Mutex<Vec<SearchRequest>>,
    request_times: Mutex<Vec<Instant>>,
    delay: Option<Duration>,
}

impl ScriptedGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(&self, query: &str, candidates: Vec<GeocodeCandidate>) -> &Self {
        self.responses.lock().insert(query.to_string(), candidates);
        self
    }

    pub fn fail(&self, query: &str) -> &Self {
        self.failures.lock().insert(query.to_string());
        self
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().clone()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        self.request_times.lock().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|request| request.query.clone())
            .collect()
    }
}

#[async_trait]
impl Geocoder for ScriptedGeocoder {
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<GeocodeCandidate>> {
        self.requests.lock().push(request.clone());
        self.request_times.lock().push(Instant::now());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().contains(&request.query) {
            return Err(AppError::Config(format!("scripted failure for {}", request.query)));
        }
        Ok(self
            .responses
            .lock()
            .get(&request.query)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn venue(lat: f64, lng: f64) -> GeocodeCandidate {
    GeocodeCandidate {
        coordinates: Coordinates::new(lat, lng),
        display_name: None,
        importance: None,
        bounding_box: None,
        address: AddressParts::default(),
    }
}

pub fn settlement(
    name: &str,
    lat: f64,
    lng: f64,
    importance: f64,
    country_code: &str,
    country: &str,
) -> GeocodeCandidate {
    GeocodeCandidate {
        coordinates: Coordinates::new(lat, lng),
        display_name: Some(format!("{name}, {country}")),
        importance: Some(importance),
        bounding_box: Some(BoundingBox::around(Coordinates::new(lat, lng), 8.0)),
        address: AddressParts {
            city: Some(name.to_string()),
            country: Some(country.to_string()),
            country_code: Some(country_code.to_string()),
            ..AddressParts::default()
        },
    }
}

pub fn paris_candidate() -> GeocodeCandidate {
    GeocodeCandidate {
        bounding_box: Some(BoundingBox::from_array([48.8155, 48.9021, 2.2241, 2.4697])),
        ..settlement("Paris", 48.8566, 2.3522, 0.88, "fr", "France")
    }
}

pub fn paris() -> CityGeoResult {
    CityGeoResult {
        lat: 48.8566,
        lng: 2.3522,
        country_code: Some("fr".into()),
        country: Some("France".into()),
        state: Some("Île-de-France".into()),
        resolved_city: Some("Paris".into()),
        bounding_box: Some(BoundingBox::from_array([48.8155, 48.9021, 2.2241, 2.4697])),
        importance: Some(0.88),
    }
}
