use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_GEOCODER_BASE_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_GEOCODER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_GEOCODER_MIN_INTERVAL_MS: u64 = 1_100;
const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_CACHE_CAPACITY: usize = 500;
const DEFAULT_CACHE_EVICT_FRACTION: f64 = 0.2;
const DEFAULT_BASE_MAX_DISTANCE_KM: f64 = 80.0;
const DEFAULT_OUTLIER_MEDIAN_MULTIPLIER: f64 = 3.0;
const DEFAULT_OUTLIER_FLOOR_KM: f64 = 5.0;
const DEFAULT_ACCOMMODATION_SLOTS: usize = 4;
const DEFAULT_CITY_IMPORTANCE_THRESHOLD: f64 = 0.5;
const DEFAULT_CITY_DISAMBIGUATION_SUFFIX: &str = "university";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_base_url: String,
    pub geocoder_user_agent: String,
    pub geocoder_api_key: Option<SecretString>,
    pub geocoder_timeout_ms: u64,
    pub geocoder_min_interval_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub cache_evict_fraction: f64,
    pub base_max_distance_km: f64,
    pub outlier_median_multiplier: f64,
    pub outlier_floor_km: f64,
    pub accommodation_slots: usize,
    pub city_importance_threshold: f64,
    pub city_disambiguation_suffix: String,
    pub database_file_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocoder_base_url: String,
    pub geocoder_user_agent: String,
    pub geocoder_timeout_ms: u64,
    pub geocoder_min_interval_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub base_max_distance_km: f64,
    pub accommodation_slots: usize,
    pub database_file_name: String,
    pub has_geocoder_api_key: bool,
}

/// Tuning for the place extractor.
#[derive(Clone, Copy, Debug)]
pub struct ExtractorSettings {
    pub accommodation_slots: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct CacheSettings {
    pub ttl_ms: i64,
    pub capacity: usize,
    pub evict_fraction: f64,
}

/// Tuning shared by the city and venue resolvers.
#[derive(Clone, Debug)]
pub struct ResolverSettings {
    pub base_max_distance_km: f64,
    pub city_importance_threshold: f64,
    pub city_disambiguation_suffix: String,
}

#[derive(Clone, Copy, Debug)]
pub struct OutlierSettings {
    pub median_multiplier: f64,
    pub floor_km: f64,
    pub min_points: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            geocoder_base_url: env::var("GEOCODER_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEOCODER_BASE_URL.to_string()),
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(default_user_agent),
            geocoder_api_key: env::var("GEOCODER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocoder_timeout_ms: parse_u64("GEOCODER_TIMEOUT_MS", DEFAULT_GEOCODER_TIMEOUT_MS)
                .max(1),
            geocoder_min_interval_ms: parse_u64(
                "GEOCODER_MIN_INTERVAL_MS",
                DEFAULT_GEOCODER_MIN_INTERVAL_MS,
            ),
            cache_ttl_secs: parse_u64("GEO_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            cache_capacity: parse_usize("GEO_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY).max(1),
            cache_evict_fraction: parse_f64(
                "GEO_CACHE_EVICT_FRACTION",
                DEFAULT_CACHE_EVICT_FRACTION,
            )
            .clamp(0.01, 1.0),
            base_max_distance_km: parse_f64("BASE_MAX_DISTANCE_KM", DEFAULT_BASE_MAX_DISTANCE_KM),
            outlier_median_multiplier: parse_f64(
                "OUTLIER_MEDIAN_MULTIPLIER",
                DEFAULT_OUTLIER_MEDIAN_MULTIPLIER,
            ),
            outlier_floor_km: parse_f64("OUTLIER_FLOOR_KM", DEFAULT_OUTLIER_FLOOR_KM),
            accommodation_slots: parse_usize("ACCOMMODATION_SLOTS", DEFAULT_ACCOMMODATION_SLOTS),
            city_importance_threshold: parse_f64(
                "CITY_IMPORTANCE_THRESHOLD",
                DEFAULT_CITY_IMPORTANCE_THRESHOLD,
            ),
            city_disambiguation_suffix: env::var("CITY_DISAMBIGUATION_SUFFIX")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CITY_DISAMBIGUATION_SUFFIX.to_string()),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "itinerary-geo.db".to_string()),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocoder_base_url: self.geocoder_base_url.clone(),
            geocoder_user_agent: self.geocoder_user_agent.clone(),
            geocoder_timeout_ms: self.geocoder_timeout_ms,
            geocoder_min_interval_ms: self.geocoder_min_interval_ms,
            cache_ttl_secs: self.cache_ttl_secs,
            cache_capacity: self.cache_capacity,
            base_max_distance_km: self.base_max_distance_km,
            accommodation_slots: self.accommodation_slots,
            database_file_name: self.database_file_name.clone(),
            has_geocoder_api_key: self.geocoder_api_key.is_some(),
        }
    }

    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            accommodation_slots: self.accommodation_slots,
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl_ms: (self.cache_ttl_secs as i64).saturating_mul(1_000),
            capacity: self.cache_capacity,
            evict_fraction: self.cache_evict_fraction,
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            base_max_distance_km: self.base_max_distance_km,
            city_importance_threshold: self.city_importance_threshold,
            city_disambiguation_suffix: self.city_disambiguation_suffix.clone(),
        }
    }

    pub fn outlier_settings(&self) -> OutlierSettings {
        OutlierSettings {
            median_multiplier: self.outlier_median_multiplier,
            floor_km: self.outlier_floor_km,
            min_points: 3,
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            accommodation_slots: DEFAULT_ACCOMMODATION_SLOTS,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: (DEFAULT_CACHE_TTL_SECS * 1_000) as i64,
            capacity: DEFAULT_CACHE_CAPACITY,
            evict_fraction: DEFAULT_CACHE_EVICT_FRACTION,
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            base_max_distance_km: DEFAULT_BASE_MAX_DISTANCE_KM,
            city_importance_threshold: DEFAULT_CITY_IMPORTANCE_THRESHOLD,
            city_disambiguation_suffix: DEFAULT_CITY_DISAMBIGUATION_SUFFIX.to_string(),
        }
    }
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            median_multiplier: DEFAULT_OUTLIER_MEDIAN_MULTIPLIER,
            floor_km: DEFAULT_OUTLIER_FLOOR_KM,
            min_points: 3,
        }
    }
}

fn default_user_agent() -> String {
    format!("itinerary-geo/{}", env!("CARGO_PKG_VERSION"))
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GEOCODER_API_KEY", "secret");
        env::set_var("DATABASE_FILE_NAME", "custom.db");
        env::set_var("GEO_CACHE_CAPACITY", "250");
        env::set_var("BASE_MAX_DISTANCE_KM", "not-a-number");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_file_name, "custom.db");
        assert_eq!(public.cache_capacity, 250);
        assert!(public.has_geocoder_api_key);
        assert!(config.geocoder_api_key.is_some());
        assert_eq!(public.base_max_distance_km, DEFAULT_BASE_MAX_DISTANCE_KM);
        assert_eq!(public.geocoder_timeout_ms, DEFAULT_GEOCODER_TIMEOUT_MS);

        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret"));

        env::remove_var("GEOCODER_API_KEY");
        env::remove_var("DATABASE_FILE_NAME");
        env::remove_var("GEO_CACHE_CAPACITY");
        env::remove_var("BASE_MAX_DISTANCE_KM");
    }

    #[test]
    fn derives_component_settings() {
        let config = AppConfig::from_env();
        let cache = config.cache_settings();
        assert_eq!(cache.ttl_ms, config.cache_ttl_secs as i64 * 1_000);
        assert_eq!(config.outlier_settings().min_points, 3);
        assert_eq!(
            config.extractor_settings().accommodation_slots,
            config.accommodation_slots
        );
    }
}
