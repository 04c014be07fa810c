use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ResolverSettings;
use crate::geo::CityGeoResult;
use crate::geocoder::{GeocodeCandidate, Geocoder, SearchRequest};

const CITY_CANDIDATE_LIMIT: u8 = 5;

/// Lookups attempted in order; later ones only run when they apply to what
/// the earlier ones produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CityStrategy {
    Direct,
    Disambiguate,
}

const CITY_STRATEGIES: &[CityStrategy] = &[CityStrategy::Direct, CityStrategy::Disambiguate];

impl CityStrategy {
    fn applies(
        self,
        current: Option<&CityGeoResult>,
        location: &str,
        settings: &ResolverSettings,
    ) -> bool {
        match (self, current) {
            (CityStrategy::Direct, current) => current.is_none(),
            (CityStrategy::Disambiguate, Some(current)) => {
                let weak = current.importance.unwrap_or(0.0) < settings.city_importance_threshold;
                let echoed = current
                    .resolved_city
                    .as_deref()
                    .is_some_and(|city| city.trim().eq_ignore_ascii_case(location));
                weak && echoed
            }
            (CityStrategy::Disambiguate, None) => false,
        }
    }

    fn query(self, location: &str, settings: &ResolverSettings) -> String {
        match self {
            CityStrategy::Direct => location.to_string(),
            CityStrategy::Disambiguate => {
                format!("{location} {}", settings.city_disambiguation_suffix)
            }
        }
    }

    fn prefer(self, current: CityGeoResult, candidate: CityGeoResult) -> CityGeoResult {
        match self {
            CityStrategy::Direct => candidate,
            CityStrategy::Disambiguate => {
                let differs = match (&current.resolved_city, &candidate.resolved_city) {
                    (Some(a), Some(b)) => !a.eq_ignore_ascii_case(b),
                    (None, None) => false,
                    _ => true,
                };
                if differs {
                    info!(
                        from = ?current.resolved_city,
                        to = ?candidate.resolved_city,
                        "disambiguated trip destination"
                    );
                    candidate
                } else {
                    current
                }
            }
        }
    }
}

pub struct CityResolver {
    geocoder: Arc<dyn Geocoder>,
    settings: ResolverSettings,
}

impl CityResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, settings: ResolverSettings) -> Self {
        Self { geocoder, settings }
    }

    pub async fn resolve(&self, location: &str) -> Option<CityGeoResult> {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }

        let mut resolved: Option<CityGeoResult> = None;
        for strategy in CITY_STRATEGIES {
            if !strategy.applies(resolved.as_ref(), location, &self.settings) {
                continue;
            }
            let query = strategy.query(location, &self.settings);
            let Some(candidate) = self.lookup(&query).await else {
                continue;
            };
            resolved = Some(match resolved {
                Some(current) => strategy.prefer(current, candidate),
                None => candidate,
            });
        }

        if resolved.is_none() {
            info!(location, "trip destination could not be resolved");
        }
        resolved
    }

    async fn lookup(&self, query: &str) -> Option<CityGeoResult> {
        let request = SearchRequest::new(query).with_limit(CITY_CANDIDATE_LIMIT);
        let candidates = match self.geocoder.search(&request).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(?err, query, "city lookup failed");
                return None;
            }
        };

        let best = candidates.into_iter().reduce(|best, candidate| {
            if candidate.importance.unwrap_or(0.0) > best.importance.unwrap_or(0.0) {
                candidate
            } else {
                best
            }
        })?;
        debug!(
            query,
            importance = ?best.importance,
            city = ?best.address.locality(),
            "selected city candidate"
        );
        Some(into_city(best))
    }
}

fn into_city(candidate: GeocodeCandidate) -> CityGeoResult {
    let resolved_city = candidate.address.locality().map(str::to_string);
    CityGeoResult {
        lat: candidate.coordinates.lat,
        lng: candidate.coordinates.lng,
        country_code: candidate.address.country_code,
        country: candidate.address.country,
        state: candidate.address.state,
        resolved_city,
        bounding_box: candidate.bounding_box,
        importance: candidate.importance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{paris_candidate, settlement, ScriptedGeocoder};

    fn resolver(geocoder: &Arc<ScriptedGeocoder>) -> CityResolver {
        CityResolver::new(geocoder.clone(), ResolverSettings::default())
    }

    #[tokio::test]
    async fn picks_most_important_candidate() {
        let geocoder = Arc::new(ScriptedGeocoder::new());
        geocoder.respond(
            "Paris",
            vec![
                settlement("Paris", 33.66, -95.55, 0.45, "us", "United States"),
                paris_candidate(),
            ],
        );

        let city = resolver(&geocoder).resolve("Paris").await.unwrap();
        assert_eq!(city.country_code.as_deref(), Some("fr"));
        assert_eq!(city.resolved_city.as_deref(), Some("Paris"));
        assert!(city.bounding_box.is_some());
        assert_eq!(geocoder.queries(), vec!["Paris"]);
        assert_eq!(geocoder.requests()[0].limit, CITY_CANDIDATE_LIMIT);
    }

    #[tokio::test]
    async fn retries_ambiguous_names_with_suffix() {
        let geocoder = Arc::new(ScriptedGeocoder::new());
        geocoder
            .respond(
                "Stanford",
                vec![settlement("Stanford", 52.03, 0.49, 0.3, "gb", "United Kingdom")],
            )
            .respond(
                "Stanford university",
                vec![settlement("Palo Alto", 37.43, -122.17, 0.7, "us", "United States")],
            );

        let city = resolver(&geocoder).resolve("Stanford").await.unwrap();
        assert_eq!(city.resolved_city.as_deref(), Some("Palo Alto"));
        assert_eq!(city.country_code.as_deref(), Some("us"));
        assert_eq!(geocoder.queries(), vec!["Stanford", "Stanford university"]);
    }

    #[tokio::test]
    async fn keeps_primary_when_retry_lands_in_same_city() {
        let geocoder = Arc::new(ScriptedGeocoder::new());
        geocoder
            .respond("Springfield", vec![settlement("Springfield", 39.8, -89.6, 0.4, "us", "United States")])
            .respond(
                "Springfield university",
                vec![settlement("Springfield", 37.2, -93.3, 0.3, "us", "United States")],
            );

        let city = resolver(&geocoder).resolve("Springfield").await.unwrap();
        assert_eq!(city.lat, 39.8);
    }

    #[tokio::test]
    async fn skips_retry_for_confident_or_renamed_results() {
        let geocoder = Arc::new(ScriptedGeocoder::new());
        geocoder
            .respond("Paris", vec![paris_candidate()])
            .respond(
                "Eiffel Tower",
                vec![settlement("Paris", 48.858, 2.294, 0.3, "fr", "France")],
            );
        let resolver = resolver(&geocoder);

        assert!(resolver.resolve("Paris").await.is_some());
        assert!(resolver.resolve("Eiffel Tower").await.is_some());
        assert_eq!(geocoder.queries(), vec!["Paris", "Eiffel Tower"]);
    }

    #[tokio::test]
    async fn failures_yield_no_city() {
        let geocoder = Arc::new(ScriptedGeocoder::new());
        geocoder.fail("Atlantis");
        let resolver = resolver(&geocoder);

        assert!(resolver.resolve("Atlantis").await.is_none());
        assert!(resolver.resolve("Nowhere").await.is_none());
        assert!(resolver.resolve("   ").await.is_none());
        assert_eq!(geocoder.queries(), vec!["Atlantis", "Nowhere"]);
    }
}
