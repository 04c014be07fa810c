use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_DEGREE_LAT: f64 = 111.32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        distance_km(self.lat, self.lng, other.lat, other.lng)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Geographic extent in the geocoder's `[south, north, west, east]` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn from_array(values: [f64; 4]) -> Self {
        Self {
            south: values[0],
            north: values[1],
            west: values[2],
            east: values[3],
        }
    }

    /// Half of the south-west to north-east diagonal.
    pub fn radius_km(&self) -> f64 {
        distance_km(self.south, self.west, self.north, self.east) / 2.0
    }

    /// Square-ish box of `radius_km` around `center`, clamped to valid ranges.
    pub fn around(center: Coordinates, radius_km: f64) -> Self {
        let lat_delta = radius_km / KM_PER_DEGREE_LAT;
        let cos_lat = center.lat.to_radians().cos().abs().max(0.01);
        let lng_delta = radius_km / (KM_PER_DEGREE_LAT * cos_lat);
        Self {
            south: (center.lat - lat_delta).max(-90.0),
            north: (center.lat + lat_delta).min(90.0),
            west: (center.lng - lng_delta).max(-180.0),
            east: (center.lng + lng_delta).min(180.0),
        }
    }

    /// `west,north,east,south`, the order the search endpoint expects.
    pub fn to_viewbox(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{:.6}",
            self.west, self.north, self.east, self.south
        )
    }
}

/// Resolved anchor for a trip destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityGeoResult {
    pub lat: f64,
    pub lng: f64,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub resolved_city: Option<String>,
    pub bounding_box: Option<BoundingBox>,
    pub importance: Option<f64>,
}

impl CityGeoResult {
    pub fn anchor(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }

    pub fn bounding_box_radius_km(&self) -> f64 {
        self.bounding_box
            .map(|bbox| bbox.radius_km())
            .unwrap_or(0.0)
    }

    pub fn effective_radius_km(&self, base_max_distance_km: f64) -> f64 {
        effective_radius_km(self.bounding_box.as_ref(), base_max_distance_km)
    }

    /// Country or region sized destinations, as opposed to a single city.
    pub fn is_regional(&self, base_max_distance_km: f64) -> bool {
        self.resolved_city.is_none() || self.bounding_box_radius_km() > base_max_distance_km
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLocation {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl MapLocation {
    pub fn new(name: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            name: name.into(),
            lat: coordinates.lat,
            lng: coordinates.lng,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

/// Great-circle distance in kilometres.
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn effective_radius_km(bounding_box: Option<&BoundingBox>, base_max_distance_km: f64) -> f64 {
    let bbox_radius = bounding_box.map(BoundingBox::radius_km).unwrap_or(0.0);
    bbox_radius.max(base_max_distance_km)
}

/// Sum of consecutive leg lengths along `locations`.
pub fn route_distance_km(locations: &[MapLocation]) -> f64 {
    locations
        .windows(2)
        .map(|pair| pair[0].coordinates().distance_km(&pair[1].coordinates()))
        .sum()
}
