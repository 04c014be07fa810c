use std::sync::Arc;

use httptest::matchers::{all_of, contains, matches, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::mpsc::UnboundedReceiver;

use itinerary_geo::{
    AppConfig, AppError, ChannelObserver, Geocoder, ItineraryMapper, NominatimClient,
    RouteRequest, RouteStage, RouteUpdate, SearchRequest,
};

const ITINERARY: &str = r#"# A Day in Paris

## Morning
- Start at the [Louvre Museum](https://www.google.com/maps/search/?api=1&query=Louvre+Museum,+Paris)
- Walk to the **Eiffel Tower**
- Lunch at **Le Bistrot Perdu**

## Where to Stay
- **Hôtel Le Marais**: quiet and central

## Trip Soundtrack
- **La Vie en Rose** - Édith Piaf
"#;

fn config_for(server: &Server) -> AppConfig {
    AppConfig {
        geocoder_base_url: server.url("/").to_string(),
        geocoder_user_agent: "itinerary-geo-tests/0.1".to_string(),
        geocoder_api_key: None,
        geocoder_timeout_ms: 5_000,
        geocoder_min_interval_ms: 0,
        cache_ttl_secs: 7 * 24 * 60 * 60,
        cache_capacity: 500,
        cache_evict_fraction: 0.2,
        base_max_distance_km: 80.0,
        outlier_median_multiplier: 3.0,
        outlier_floor_km: 5.0,
        accommodation_slots: 4,
        city_importance_threshold: 0.5,
        city_disambiguation_suffix: "university".to_string(),
        database_file_name: "itinerary-geo.db".to_string(),
    }
}

fn place(lat: &str, lon: &str) -> Value {
    json!([{ "lat": lat, "lon": lon, "display_name": "somewhere", "address": {} }])
}

fn expect_search(server: &Server, query: &'static str, times: usize, body: Value) {
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/search"),
            request::query(url_decoded(contains(("q", query))))
        ])
        .times(times)
        .respond_with(json_encoded(body)),
    );
}

fn drain(mut receiver: UnboundedReceiver<RouteUpdate>) -> Vec<RouteUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = receiver.try_recv() {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn resolves_caches_and_reuses_venues() {
    let server = Server::run();

    expect_search(
        &server,
        "Paris",
        2,
        json!([{
            "lat": "48.8588897",
            "lon": "2.3200410",
            "display_name": "Paris, Île-de-France, France",
            "importance": 0.88,
            "boundingbox": ["48.8155755", "48.9021560", "2.2241220", "2.4697602"],
            "address": {
                "city": "Paris",
                "state": "Île-de-France",
                "country": "France",
                "country_code": "fr"
            }
        }]),
    );
    server.expect(
        Expectation::matching(all_of![
            request::path("/search"),
            request::query(url_decoded(contains((
                "q",
                matches("^Louvre Museum, Paris, France$")
            )))),
            request::query(url_decoded(contains(("countrycodes", "fr")))),
            request::query(url_decoded(contains(("bounded", "1")))),
            request::query(url_decoded(contains(("format", "jsonv2"))))
        ])
        .times(1)
        .respond_with(json_encoded(place("48.8606", "2.3376"))),
    );
    expect_search(
        &server,
        "Eiffel Tower, Paris, France",
        1,
        place("48.8584", "2.2945"),
    );
    expect_search(
        &server,
        "Hôtel Le Marais, Paris, France",
        1,
        place("48.8590", "2.3620"),
    );
    // Resolves to Bordeaux under both query shapes, so it is never cached.
    expect_search(
        &server,
        "Le Bistrot Perdu, Paris, France",
        2,
        place("44.8378", "-0.5792"),
    );
    expect_search(&server, "Le Bistrot Perdu", 2, place("44.8378", "-0.5792"));

    let dir = tempdir().unwrap();
    let mapper = ItineraryMapper::with_config(dir.path(), config_for(&server)).unwrap();

    let (observer, receiver) = ChannelObserver::new();
    let first = mapper
        .plan(RouteRequest::new(ITINERARY, "Paris"), Arc::new(observer))
        .finished()
        .await
        .unwrap();
    let first_updates = drain(receiver);

    let plotted: Vec<&str> = first.locations.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(first.stage, RouteStage::Final);
    assert_eq!(first.total_places, 4);
    assert_eq!(first.resolved_count, 3);
    assert_eq!(plotted[0], "Louvre Museum");
    assert!(plotted.contains(&"Hôtel Le Marais"));
    assert!(!plotted.contains(&"Le Bistrot Perdu"));
    assert!(first_updates
        .iter()
        .all(|u| u.stage != RouteStage::Cached));
    assert_eq!(mapper.health().cached_entries, 3);

    let (observer, receiver) = ChannelObserver::new();
    let second = mapper
        .plan(RouteRequest::new(ITINERARY, "Paris"), Arc::new(observer))
        .finished()
        .await
        .unwrap();
    let second_updates = drain(receiver);

    assert_eq!(second_updates[0].stage, RouteStage::Cached);
    assert_eq!(second_updates[0].locations.len(), 3);
    assert_eq!(second.locations, first.locations);

    drop(mapper);
    let reopened = ItineraryMapper::with_config(dir.path(), config_for(&server)).unwrap();
    let health = reopened.health();
    assert_eq!(health.cached_entries, 3);
    assert!(!health.db_bootstrap_recovered);
    assert!(!health.config.has_geocoder_api_key);
}

#[tokio::test]
async fn unavailable_geocoder_yields_no_route() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/search"))
            .times(2)
            .respond_with(status_code(503)),
    );

    let config = config_for(&server);
    let client = NominatimClient::new(&config).unwrap();
    let err = client.search(&SearchRequest::new("Paris")).await.unwrap_err();
    assert!(matches!(err, AppError::GeocoderStatus { status: 503, .. }));

    let dir = tempdir().unwrap();
    let mapper = ItineraryMapper::with_config(dir.path(), config).unwrap();
    let (observer, receiver) = ChannelObserver::new();
    let update = mapper
        .plan(RouteRequest::new(ITINERARY, "Paris"), Arc::new(observer))
        .finished()
        .await;

    assert!(update.is_none());
    assert!(drain(receiver).is_empty());
    assert_eq!(mapper.health().cached_entries, 0);
}
