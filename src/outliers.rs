use tracing::debug;

use crate::config::OutlierSettings;
use crate::geo::{Coordinates, MapLocation};

/// Repeatedly drops the point farthest from the centroid while it lies beyond
/// `max(median * multiplier, floor)`. Each removal recomputes the centroid and
/// median, so one bad point cannot hide another. Input order is preserved.
pub fn filter_outliers(locations: &[MapLocation], settings: &OutlierSettings) -> Vec<MapLocation> {
    let mut kept = locations.to_vec();
    while kept.len() > settings.min_points {
        let center = centroid(&kept);
        let distances: Vec<f64> = kept
            .iter()
            .map(|location| location.coordinates().distance_km(&center))
            .collect();
        let threshold = (median(&distances) * settings.median_multiplier).max(settings.floor_km);

        let Some((index, farthest)) = distances
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            break;
        };
        if farthest <= threshold {
            break;
        }

        let removed = kept.remove(index);
        debug!(
            venue = %removed.name,
            distance_km = farthest,
            threshold_km = threshold,
            "dropped outlying venue"
        );
    }
    kept
}

fn centroid(locations: &[MapLocation]) -> Coordinates {
    let count = locations.len().max(1) as f64;
    let (lat, lng) = locations
        .iter()
        .fold((0.0, 0.0), |(lat, lng), location| {
            (lat + location.lat, lng + location.lng)
        });
    Coordinates::new(lat / count, lng / count)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
