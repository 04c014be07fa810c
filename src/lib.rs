mod cache;
mod city;
mod config;
mod db;
mod errors;
mod extractor;
mod geo;
mod geocoder;
mod outliers;
mod pipeline;
mod resolver;
mod route;
#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::{
    CacheBackend, CacheEntry, CacheStore, Clock, GeoCache, MemoryBackend, SystemClock,
    GEO_CACHE_VERSION,
};
pub use crate::city::CityResolver;
pub use crate::config::{
    AppConfig, CacheSettings, ExtractorSettings, OutlierSettings, PublicAppConfig,
    ResolverSettings,
};
pub use crate::db::{
    bootstrap, DatabaseBootstrap, DatabaseContext, SqliteBackend, GEO_CACHE_STORAGE_KEY,
};
pub use crate::errors::{AppError, AppResult};
pub use crate::extractor::{extract_candidates, extract_place_names, ExtractedPlaces};
pub use crate::geo::{
    distance_km, effective_radius_km, route_distance_km, BoundingBox, CityGeoResult, Coordinates,
    MapLocation,
};
pub use crate::geocoder::{
    build_geocoder, AddressParts, GeocodeCandidate, Geocoder, IntervalGate, NominatimClient,
    RateGate, SearchRequest, ThrottledGeocoder, Unthrottled,
};
pub use crate::outliers::filter_outliers;
pub use crate::pipeline::{
    ChannelObserver, RouteObserver, RoutePipeline, RouteRequest, RouteStage, RouteUpdate,
    RunHandle, DEFAULT_MAX_RESULTS,
};
pub use crate::resolver::{CacheLookup, CityContext, GeocodeResolver};
pub use crate::route::optimize_route;

#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub db_path: String,
    pub db_bootstrap_recovered: bool,
    pub cached_entries: usize,
    pub config: PublicAppConfig,
}

/// Process-wide entry point: owns storage, the geo cache and the pipeline.
pub struct ItineraryMapper {
    db_path: PathBuf,
    config: AppConfig,
    cache: Arc<GeoCache>,
    pipeline: Arc<RoutePipeline>,
    db_bootstrap_recovered: bool,
}

impl ItineraryMapper {
    pub fn initialize<P: AsRef<Path>>(data_dir: P) -> AppResult<Self> {
        init_tracing();
        Self::with_config(data_dir, AppConfig::from_env())
    }

    pub fn with_config<P: AsRef<Path>>(data_dir: P, config: AppConfig) -> AppResult<Self> {
        let DatabaseBootstrap {
            context: DatabaseContext { connection, path },
            recovered,
        } = bootstrap(data_dir, &config.database_file_name)?;

        let backend = Arc::new(SqliteBackend::new(Arc::new(Mutex::new(connection))));
        let cache = Arc::new(GeoCache::open(backend, config.cache_settings()));
        let geocoder = build_geocoder(&config)?;
        let pipeline = Arc::new(RoutePipeline::new(geocoder, Arc::clone(&cache), &config));
        info!(
            path = %path.display(),
            recovered,
            cached_entries = cache.len(),
            "itinerary mapper ready"
        );

        Ok(Self {
            db_path: path,
            config,
            cache,
            pipeline,
            db_bootstrap_recovered: recovered,
        })
    }

    /// Starts resolving `request`, superseding any run still in flight.
    pub fn plan(&self, request: RouteRequest, observer: Arc<dyn RouteObserver>) -> RunHandle {
        self.pipeline.start(request, observer)
    }

    pub fn pipeline(&self) -> Arc<RoutePipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn cache(&self) -> Arc<GeoCache> {
        Arc::clone(&self.cache)
    }

    pub fn config_profile(&self) -> PublicAppConfig {
        self.config.public_profile()
    }

    pub fn health(&self) -> StorageHealth {
        StorageHealth {
            db_path: self.db_path.to_string_lossy().to_string(),
            db_bootstrap_recovered: self.db_bootstrap_recovered,
            cached_entries: self.cache.len(),
            config: self.config.public_profile(),
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,itinerary_geo=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
