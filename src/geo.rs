use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::model::{Coordinate, NominatimPlace, OpenMeteoSearch};
use crate::net::{SourceError, Transport};

pub const DEFAULT_COORDINATE: Coordinate = Coordinate::new(28.6139, 77.2090);

const CITY_TABLE: &[(&str, f64, f64)] = &[
    ("delhi", 28.6139, 77.2090),
    ("new delhi", 28.6139, 77.2090),
    ("mumbai", 19.0760, 72.8777),
    ("bangalore", 12.9716, 77.5946),
    ("bengaluru", 12.9716, 77.5946),
    ("chennai", 13.0827, 80.2707),
    ("kolkata", 22.5726, 88.3639),
    ("hyderabad", 17.3850, 78.4867),
    ("pune", 18.5204, 73.8567),
    ("ahmedabad", 23.0225, 72.5714),
    ("jaipur", 26.9124, 75.7873),
    ("lucknow", 26.8467, 80.9462),
    ("kanpur", 26.4499, 80.3319),
    ("nagpur", 21.1458, 79.0882),
    ("indore", 22.7196, 75.8577),
    ("thane", 19.2183, 72.9781),
    ("bhopal", 23.2599, 77.4126),
    ("visakhapatnam", 17.6868, 83.2185),
    ("patna", 25.5941, 85.1376),
    ("vadodara", 22.3072, 73.1812),
    ("ghaziabad", 28.6692, 77.4538),
    ("ludhiana", 30.9010, 75.8573),
    ("agra", 27.1767, 78.0081),
    ("nashik", 19.9975, 73.7898),
    ("faridabad", 28.4089, 77.3178),
    ("meerut", 28.9845, 77.7064),
    ("rajkot", 22.3039, 70.8022),
    ("varanasi", 25.3176, 82.9739),
    ("srinagar", 34.0837, 74.7973),
    ("noida", 28.5355, 77.3910),
    ("ranchi", 23.3441, 85.3096),
    ("kochi", 9.9312, 76.2673),
    ("coimbatore", 11.0168, 76.9558),
    ("madurai", 9.9252, 78.1198),
    ("mysore", 12.2958, 76.6394),
    ("gurgaon", 28.4595, 77.0266),
    ("chandigarh", 30.7333, 76.7794),
    ("amritsar", 31.6340, 74.8723),
    ("bhubaneswar", 20.2961, 85.8245),
    ("london", 51.5074, -0.1278),
    ("new york", 40.7128, -74.0060),
    ("san francisco", 37.7749, -122.4194),
    ("beijing", 39.9042, 116.4074),
    ("tokyo", 35.6762, 139.6503),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeoSource {
    Literal,
    Primary,
    Secondary,
    CityTable,
    Default,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolution {
    pub coordinate: Coordinate,
    pub source: GeoSource,
}

#[derive(Clone, Debug)]
pub struct GeoEndpoints {
    pub primary: String,
    pub secondary: String,
}

#[derive(Clone, Debug)]
enum GeoPayload {
    Nominatim(Vec<NominatimPlace>),
    OpenMeteo(OpenMeteoSearch),
}

impl GeoPayload {
    fn coordinate(&self) -> Option<Coordinate> {
        let coord = match self {
            GeoPayload::Nominatim(places) => places
                .iter()
                .find_map(|p| Some(Coordinate::new(p.lat?, p.lon?))),
            GeoPayload::OpenMeteo(search) => search
                .results
                .iter()
                .find_map(|p| Some(Coordinate::new(p.latitude?, p.longitude?))),
        };
        coord.filter(Coordinate::is_valid)
    }
}

#[derive(Clone)]
pub struct GeoResolver {
    transport: Arc<dyn Transport>,
    endpoints: GeoEndpoints,
}

impl GeoResolver {
    pub fn new(transport: Arc<dyn Transport>, endpoints: GeoEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn resolve(&self, place: &str) -> Coordinate {
        self.resolve_detailed(place).coordinate
    }

    pub fn resolve_detailed(&self, place: &str) -> Resolution {
        let query = place.trim();
        if query.is_empty() {
            debug!("empty place name, using default coordinate");
            return Resolution {
                coordinate: DEFAULT_COORDINATE,
                source: GeoSource::Default,
            };
        }

        if let Some(coordinate) = parse_literal(query) {
            return Resolution {
                coordinate,
                source: GeoSource::Literal,
            };
        }

        match self.query_primary(query) {
            Ok(coordinate) => {
                return Resolution {
                    coordinate,
                    source: GeoSource::Primary,
                }
            }
            Err(err) => debug!("primary geocoder failed for {query:?}: {err}"),
        }

        match self.query_secondary(query) {
            Ok(coordinate) => {
                return Resolution {
                    coordinate,
                    source: GeoSource::Secondary,
                }
            }
            Err(err) => debug!("secondary geocoder failed for {query:?}: {err}"),
        }

        if let Some(coordinate) = lookup_city(query) {
            info!("geocoders unavailable, {query:?} resolved from city table");
            return Resolution {
                coordinate,
                source: GeoSource::CityTable,
            };
        }

        info!("could not resolve {query:?}, using default coordinate");
        Resolution {
            coordinate: DEFAULT_COORDINATE,
            source: GeoSource::Default,
        }
    }

    fn query_primary(&self, query: &str) -> Result<Coordinate, SourceError> {
        let url = format!(
            "{}?format=json&limit=1&q={}",
            self.endpoints.primary.trim_end_matches('/'),
            urlencoding::encode(query)
        );
        let places: Vec<NominatimPlace> = serde_json::from_value(self.transport.get_json(&url)?)?;
        GeoPayload::Nominatim(places)
            .coordinate()
            .ok_or(SourceError::Empty)
    }

    fn query_secondary(&self, query: &str) -> Result<Coordinate, SourceError> {
        let url = format!(
            "{}?count=1&format=json&name={}",
            self.endpoints.secondary.trim_end_matches('/'),
            urlencoding::encode(query)
        );
        let body: Value = self.transport.get_json(&url)?;
        let search: OpenMeteoSearch = serde_json::from_value(body)?;
        GeoPayload::OpenMeteo(search)
            .coordinate()
            .ok_or(SourceError::Empty)
    }
}

// Accepts inputs such as `"37.77, -122.41"` or `"(37.77,-122.41)"`.
fn parse_literal(input: &str) -> Option<Coordinate> {
    let cleaned = input.trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace());
    let (lat, lng) = cleaned.split_once(',')?;
    let coordinate = Coordinate::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?);
    coordinate.is_valid().then_some(coordinate)
}

pub fn lookup_city(place: &str) -> Option<Coordinate> {
    let key = place.trim().to_ascii_lowercase();
    if key.is_empty() {
        return None;
    }
    let exact = CITY_TABLE.iter().find(|(name, _, _)| *name == key);
    exact
        .or_else(|| CITY_TABLE.iter().find(|(name, _, _)| key.contains(name)))
        .map(|(_, lat, lng)| Coordinate::new(*lat, *lng))
}
