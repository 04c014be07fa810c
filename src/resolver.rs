use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::cache::GeoCache;
use crate::geo::{BoundingBox, CityGeoResult, Coordinates};
use crate::geocoder::{Geocoder, SearchRequest};

/// Everything a venue lookup needs to know about the trip destination.
#[derive(Debug, Clone, PartialEq)]
pub struct CityContext {
    pub name: String,
    pub anchor: Option<Coordinates>,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub max_distance_km: f64,
    pub regional: bool,
}

impl CityContext {
    pub fn from_city(name: &str, city: &CityGeoResult, base_max_distance_km: f64) -> Self {
        Self {
            name: name.trim().to_string(),
            anchor: Some(city.anchor()),
            country_code: city.country_code.clone(),
            country: city.country.clone(),
            max_distance_km: city.effective_radius_km(base_max_distance_km),
            regional: city.is_regional(base_max_distance_km),
        }
    }

    /// Context without an anchor; every coordinate passes validation.
    pub fn unanchored(name: &str, base_max_distance_km: f64) -> Self {
        Self {
            name: name.trim().to_string(),
            anchor: None,
            country_code: None,
            country: None,
            max_distance_km: base_max_distance_km,
            regional: false,
        }
    }

    pub fn distance_from_anchor(&self, coordinates: Coordinates) -> Option<f64> {
        self.anchor.map(|anchor| anchor.distance_km(&coordinates))
    }

    pub fn accepts(&self, coordinates: Coordinates) -> bool {
        coordinates.is_valid()
            && self
                .distance_from_anchor(coordinates)
                .map_or(true, |distance| distance <= self.max_distance_km)
    }

    fn viewbox(&self) -> Option<BoundingBox> {
        self.anchor
            .map(|anchor| BoundingBox::around(anchor, self.max_distance_km))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheLookup {
    Hit(Coordinates),
    /// Cached, but outside the current city's radius.
    Rejected,
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VenueStrategy {
    Qualified,
    NameOnly,
}

const VENUE_STRATEGIES: &[VenueStrategy] = &[VenueStrategy::Qualified, VenueStrategy::NameOnly];

impl VenueStrategy {
    fn request(self, venue: &str, ctx: &CityContext) -> SearchRequest {
        let query = match self {
            VenueStrategy::Qualified => match ctx.country.as_deref() {
                // Country names appended to region-scale queries confuse the service.
                Some(country) if !ctx.regional && !ctx.name.eq_ignore_ascii_case(country) => {
                    format!("{venue}, {}, {country}", ctx.name)
                }
                _ => format!("{venue}, {}", ctx.name),
            },
            VenueStrategy::NameOnly => venue.to_string(),
        };

        let request = SearchRequest::new(query).in_country(ctx.country_code.as_deref());
        match ctx.viewbox() {
            Some(viewbox) => request.bounded_to(viewbox),
            None => request,
        }
    }
}

/// Resolves single venues inside a city, consulting the geo cache first.
pub struct GeocodeResolver {
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<GeoCache>,
}

impl GeocodeResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, cache: Arc<GeoCache>) -> Self {
        Self { geocoder, cache }
    }

    pub async fn resolve(&self, venue: &str, ctx: &CityContext) -> Option<Coordinates> {
        match self.lookup_cached(venue, ctx) {
            CacheLookup::Hit(coordinates) => Some(coordinates),
            CacheLookup::Rejected => None,
            CacheLookup::Miss => self.resolve_remote(venue, ctx).await,
        }
    }

    pub fn lookup_cached(&self, venue: &str, ctx: &CityContext) -> CacheLookup {
        match self.cache.get(venue, &ctx.name) {
            Some(coordinates) if ctx.accepts(coordinates) => CacheLookup::Hit(coordinates),
            Some(coordinates) => {
                debug!(
                    venue,
                    distance_km = ?ctx.distance_from_anchor(coordinates),
                    "cached venue falls outside current city radius"
                );
                CacheLookup::Rejected
            }
            None => CacheLookup::Miss,
        }
    }

    /// Tries each query strategy until one yields a coordinate inside the
    /// effective radius. Failures of any kind resolve to `None`.
    pub async fn resolve_remote(&self, venue: &str, ctx: &CityContext) -> Option<Coordinates> {
        for strategy in VENUE_STRATEGIES {
            let request = strategy.request(venue, ctx);
            let candidates = match self.geocoder.search(&request).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    debug!(?err, venue, ?strategy, "venue lookup failed");
                    continue;
                }
            };

            let Some(candidate) = candidates.first() else {
                trace!(venue, ?strategy, "no venue match");
                continue;
            };
            let coordinates = candidate.coordinates;
            if !ctx.accepts(coordinates) {
                debug!(
                    venue,
                    ?strategy,
                    distance_km = ?ctx.distance_from_anchor(coordinates),
                    max_distance_km = ctx.max_distance_km,
                    "rejected venue outside city radius"
                );
                continue;
            }

            if let Err(err) = self.cache.put(venue, &ctx.name, coordinates) {
                warn!(?err, venue, "failed to persist geocoded venue");
            }
            return Some(coordinates);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::config::CacheSettings;
    use crate::test_support::{paris, venue, ScriptedGeocoder};

    const BASE_KM: f64 = 80.0;

    fn setup() -> (Arc<ScriptedGeocoder>, Arc<GeoCache>, GeocodeResolver) {
        let geocoder = Arc::new(ScriptedGeocoder::new());
        let cache = Arc::new(GeoCache::open(
            Arc::new(MemoryBackend::default()),
            CacheSettings::default(),
        ));
        let resolver = GeocodeResolver::new(geocoder.clone(), cache.clone());
        (geocoder, cache, resolver)
    }

    fn paris_ctx() -> CityContext {
        CityContext::from_city("Paris", &paris(), BASE_KM)
    }

    #[tokio::test]
    async fn constrained_query_is_qualified_and_cached() {
        let (geocoder, cache, resolver) = setup();
        geocoder.respond("Louvre Museum, Paris, France", vec![venue(48.8606, 2.3376)]);

        let coords = resolver.resolve("Louvre Museum", &paris_ctx()).await.unwrap();
        assert_eq!(coords, Coordinates::new(48.8606, 2.3376));
        assert_eq!(cache.get("Louvre Museum", "Paris"), Some(coords));

        let requests = geocoder.requests();
        let request = &requests[0];
        assert!(request.bounded);
        assert_eq!(request.country_codes.as_deref(), Some("fr"));
        let viewbox = request.viewbox.unwrap();
        assert!(viewbox.south < 48.8566 && 48.8566 < viewbox.north);
    }

    #[tokio::test]
    async fn falls_back_to_bare_name() {
        let (geocoder, _cache, resolver) = setup();
        geocoder
            .fail("Bois de Vincennes, Paris, France")
            .respond("Bois de Vincennes", vec![venue(48.8283, 2.4330)]);

        let coords = resolver.resolve("Bois de Vincennes", &paris_ctx()).await;
        assert!(coords.is_some());
        assert_eq!(
            geocoder.queries(),
            vec!["Bois de Vincennes, Paris, France", "Bois de Vincennes"]
        );
        assert!(geocoder.requests().iter().all(|request| request.bounded));
    }

    #[tokio::test]
    async fn rejects_far_results_and_never_caches_them() {
        let (geocoder, cache, resolver) = setup();
        geocoder
            .respond("Le Bistrot, Paris, France", vec![venue(44.8378, -0.5792)])
            .respond("Le Bistrot", vec![venue(43.2965, 5.3698)]);

        assert!(resolver.resolve("Le Bistrot", &paris_ctx()).await.is_none());
        assert!(cache.get("Le Bistrot", "Paris").is_none());
        assert_eq!(geocoder.queries().len(), 2);
    }

    #[tokio::test]
    async fn cached_entries_are_revalidated() {
        let (geocoder, cache, resolver) = setup();
        cache
            .put("Mont Saint-Michel", "Paris", Coordinates::new(48.636, -1.511))
            .unwrap();
        cache
            .put("Sainte-Chapelle", "Paris", Coordinates::new(48.8554, 2.3450))
            .unwrap();

        let ctx = paris_ctx();
        assert_eq!(resolver.lookup_cached("Mont Saint-Michel", &ctx), CacheLookup::Rejected);
        assert!(resolver.resolve("Mont Saint-Michel", &ctx).await.is_none());
        assert!(resolver.resolve("Sainte-Chapelle", &ctx).await.is_some());
        assert!(geocoder.queries().is_empty());
    }

    #[tokio::test]
    async fn regional_trips_skip_country_qualifier() {
        let (geocoder, _cache, resolver) = setup();
        let mut japan = paris();
        japan.lat = 36.2;
        japan.lng = 138.25;
        japan.country = Some("日本".into());
        japan.country_code = Some("jp".into());
        japan.resolved_city = None;
        japan.bounding_box = Some(BoundingBox::from_array([20.2, 45.7, 122.7, 154.2]));
        let ctx = CityContext::from_city("Japan", &japan, BASE_KM);
        assert!(ctx.regional);
        assert!(ctx.max_distance_km > 1_000.0);

        geocoder.respond("Fushimi Inari, Japan", vec![venue(34.9671, 135.7727)]);
        assert!(resolver.resolve("Fushimi Inari", &ctx).await.is_some());
        assert_eq!(geocoder.queries(), vec!["Fushimi Inari, Japan"]);
    }

    #[tokio::test]
    async fn unanchored_context_accepts_any_match() {
        let (geocoder, _cache, resolver) = setup();
        let ctx = CityContext::unanchored("Somewhere", BASE_KM);
        geocoder.respond("Blue Door Cafe, Somewhere", vec![venue(10.0, 10.0)]);

        assert!(resolver.resolve("Blue Door Cafe", &ctx).await.is_some());
        let requests = geocoder.requests();
        let request = &requests[0];
        assert!(!request.bounded);
        assert!(request.country_codes.is_none());
    }
}
