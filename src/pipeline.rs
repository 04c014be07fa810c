use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::GeoCache;
use crate::city::CityResolver;
use crate::config::{AppConfig, ExtractorSettings, OutlierSettings, ResolverSettings};
use crate::extractor::extract_place_names;
use crate::geo::{route_distance_km, MapLocation};
use crate::geocoder::Geocoder;
use crate::outliers::filter_outliers;
use crate::resolver::{CacheLookup, CityContext, GeocodeResolver};
use crate::route::optimize_route;

pub const DEFAULT_MAX_RESULTS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStage {
    /// Built only from cache hits, before any network lookup.
    Cached,
    Progress,
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteUpdate {
    pub stage: RouteStage,
    pub locations: Vec<MapLocation>,
    pub resolved_count: usize,
    pub total_places: usize,
    pub route_distance_km: f64,
}

/// Callbacks run while the pipeline holds its run lock; starting or
/// cancelling runs from inside them deadlocks.
pub trait RouteObserver: Send + Sync {
    fn on_partial(&self, update: &RouteUpdate);
    fn on_complete(&self, update: &RouteUpdate);
}

/// Forwards every update into an unbounded channel.
pub struct ChannelObserver {
    sender: UnboundedSender<RouteUpdate>,
}

impl ChannelObserver {
    pub fn new() -> (Self, UnboundedReceiver<RouteUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, update: &RouteUpdate) {
        if self.sender.send(update.clone()).is_err() {
            debug!(stage = ?update.stage, "route update receiver dropped");
        }
    }
}

impl RouteObserver for ChannelObserver {
    fn on_partial(&self, update: &RouteUpdate) {
        self.forward(update);
    }

    fn on_complete(&self, update: &RouteUpdate) {
        self.forward(update);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub itinerary: String,
    pub city: String,
    pub max_results: usize,
}

impl RouteRequest {
    pub fn new(itinerary: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            itinerary: itinerary.into(),
            city: city.into(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

/// A spawned pipeline run.
pub struct RunHandle {
    token: CancellationToken,
    task: JoinHandle<Option<RouteUpdate>>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn finished(self) -> Option<RouteUpdate> {
        match self.task.await {
            Ok(update) => update,
            Err(err) => {
                warn!(?err, "route pipeline task failed");
                None
            }
        }
    }
}

pub struct RoutePipeline {
    city_resolver: CityResolver,
    venue_resolver: GeocodeResolver,
    cache: Arc<GeoCache>,
    extractor: ExtractorSettings,
    outliers: OutlierSettings,
    base_max_distance_km: f64,
    active: Mutex<Option<CancellationToken>>,
}

impl RoutePipeline {
    pub fn new(geocoder: Arc<dyn Geocoder>, cache: Arc<GeoCache>, config: &AppConfig) -> Self {
        Self::with_settings(
            geocoder,
            cache,
            config.resolver_settings(),
            config.extractor_settings(),
            config.outlier_settings(),
        )
    }

    pub fn with_settings(
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<GeoCache>,
        resolver: ResolverSettings,
        extractor: ExtractorSettings,
        outliers: OutlierSettings,
    ) -> Self {
        let base_max_distance_km = resolver.base_max_distance_km;
        Self {
            city_resolver: CityResolver::new(Arc::clone(&geocoder), resolver),
            venue_resolver: GeocodeResolver::new(geocoder, Arc::clone(&cache)),
            cache,
            extractor,
            outliers,
            base_max_distance_km,
            active: Mutex::new(None),
        }
    }

    /// Spawns a run, cancelling whichever run was in flight.
    pub fn start(
        self: &Arc<Self>,
        request: RouteRequest,
        observer: Arc<dyn RouteObserver>,
    ) -> RunHandle {
        let token = self.begin_run();
        let pipeline = Arc::clone(self);
        let run_token = token.clone();
        let task = tokio::spawn(async move {
            pipeline
                .run(&request, observer.as_ref(), &run_token)
                .await
        });
        RunHandle { token, task }
    }

    pub fn cancel_active(&self) {
        if let Some(token) = self.active.lock().take() {
            token.cancel();
        }
    }

    fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.active.lock().replace(token.clone()) {
            if !previous.is_cancelled() {
                debug!("cancelling in-flight route run");
            }
            previous.cancel();
        }
        token
    }

    /// Executes one run to completion. Returns the final update, or `None`
    /// when the destination could not be resolved or the run was cancelled.
    pub async fn run(
        &self,
        request: &RouteRequest,
        observer: &dyn RouteObserver,
        token: &CancellationToken,
    ) -> Option<RouteUpdate> {
        let city_name = request.city.trim();
        let names = extract_place_names(
            &request.itinerary,
            city_name,
            request.max_results,
            self.extractor,
        );
        let total_places = names.len();
        let (cached, pending): (Vec<String>, Vec<String>) = names
            .into_iter()
            .partition(|name| self.cache.contains(name, city_name));
        debug!(
            city = city_name,
            total_places,
            cached = cached.len(),
            "planning route"
        );

        let city = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            city = self.city_resolver.resolve(city_name) => city,
        };
        let Some(city) = city else {
            info!(city = city_name, "skipping route without a destination anchor");
            return None;
        };
        let ctx = CityContext::from_city(city_name, &city, self.base_max_distance_km);

        let mut resolved = Vec::with_capacity(total_places);
        for name in cached {
            match self.venue_resolver.lookup_cached(&name, &ctx) {
                CacheLookup::Hit(coordinates) => resolved.push(MapLocation::new(name, coordinates)),
                CacheLookup::Rejected | CacheLookup::Miss => {}
            }
        }
        if !resolved.is_empty() {
            let update = self.snapshot(RouteStage::Cached, &resolved, total_places);
            if !self.emit(observer, token, &update) {
                return None;
            }
        }

        for name in pending {
            let coordinates = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                coordinates = self.venue_resolver.resolve_remote(&name, &ctx) => coordinates,
            };
            let Some(coordinates) = coordinates else {
                debug!(venue = %name, "venue dropped from route");
                continue;
            };
            resolved.push(MapLocation::new(name, coordinates));
            let update = self.snapshot(RouteStage::Progress, &resolved, total_places);
            if !self.emit(observer, token, &update) {
                return None;
            }
        }

        let update = self.snapshot(RouteStage::Final, &resolved, total_places);
        if !self.emit(observer, token, &update) {
            return None;
        }
        info!(
            city = city_name,
            resolved = update.resolved_count,
            plotted = update.locations.len(),
            total_places,
            "route complete"
        );
        Some(update)
    }

    /// Delivers under the run lock, so once `start` or `cancel_active` has
    /// returned a superseded run can no longer reach its observer.
    fn emit(&self, observer: &dyn RouteObserver, token: &CancellationToken, update: &RouteUpdate) -> bool {
        let _active = self.active.lock();
        if token.is_cancelled() {
            return false;
        }
        match update.stage {
            RouteStage::Final => observer.on_complete(update),
            RouteStage::Cached | RouteStage::Progress => observer.on_partial(update),
        }
        true
    }

    fn snapshot(&self, stage: RouteStage, resolved: &[MapLocation], total_places: usize) -> RouteUpdate {
        let kept = filter_outliers(resolved, &self.outliers);
        let locations = optimize_route(&kept);
        RouteUpdate {
            stage,
            route_distance_km: route_distance_km(&locations),
            locations,
            resolved_count: resolved.len(),
            total_places,
        }
    }
}
