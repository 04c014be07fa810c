use crate::geo::MapLocation;

/// Nearest-neighbour ordering starting from the first location.
///
/// Distances are squared planar lat/lng deltas, which is good enough at city
/// and country scale. Ties go to the earlier element, so the result is
/// deterministic for a given input order.
pub fn optimize_route(locations: &[MapLocation]) -> Vec<MapLocation> {
    if locations.len() <= 2 {
        return locations.to_vec();
    }

    let mut remaining: Vec<&MapLocation> = locations[1..].iter().collect();
    let mut route = Vec::with_capacity(locations.len());
    let mut current = &locations[0];
    route.push(current.clone());

    while !remaining.is_empty() {
        let Some((index, _)) = remaining
            .iter()
            .map(|candidate| planar_distance_sq(current, candidate))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
        else {
            break;
        };
        current = remaining.remove(index);
        route.push(current.clone());
    }
    route
}

fn planar_distance_sq(a: &MapLocation, b: &MapLocation) -> f64 {
    let d_lat = a.lat - b.lat;
    let d_lng = a.lng - b.lng;
    d_lat * d_lat + d_lng * d_lng
}
